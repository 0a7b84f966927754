//! The coverage reader: resolution choice, spatial tile selection,
//! tile decoding and stitching, and symbolizer application.

mod blit;
pub mod relief;
pub mod symbolizer;

use log::{debug, warn};

use crate::codec::decode_tile;
use crate::coverage::Coverage;
use crate::envelope::Envelope;
use crate::error::{RastileError, RastileResult};
use crate::pixel::{Pixel, PixelType};
use crate::pyramid::find_matching_resolution;
use crate::raster::{Georeference, Raster};
use crate::stats::RasterStatistics;
use crate::store::TileStore;
use symbolizer::{apply_symbolizer, RasterSymbolizer};

/// A request for a rendered geographic window.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    /// The geographic window to assemble.
    pub envelope: Envelope,
    /// Output width in pixels.
    pub width: u16,
    /// Output height in pixels.
    pub height: u16,
    /// Requested horizontal resolution.
    pub x_res: f64,
    /// Requested vertical resolution.
    pub y_res: f64,
}

/// Assemble a geographic window of a coverage into a raster.
///
/// The requested resolution is matched against the persisted pyramid
/// levels; tiles intersecting the window are decoded at the chosen
/// scale and blitted into a NoData-primed buffer. A tile that fails
/// to decode is logged and skipped, leaving its footprint as NoData.
pub fn render_window<S: TileStore + ?Sized>(
    store: &S,
    coverage: &Coverage,
    request: &RenderRequest,
) -> RastileResult<Raster> {
    if request.width == 0 || request.height == 0 {
        return Err(RastileError::invalid("output dimensions must be >= 1"));
    }
    let levels = store.levels(coverage.name())?;
    let matched = find_matching_resolution(&levels, request.x_res, request.y_res)?;
    debug!(
        "rendering {}: level {} scale {:?} over {:?}",
        coverage.name(),
        matched.level,
        matched.scale,
        request.envelope
    );

    let no_data = match coverage.no_data() {
        Some(pixel) => pixel.clone(),
        None => Pixel::new(
            coverage.sample_type(),
            coverage.pixel_type(),
            coverage.bands(),
        )?,
    };
    let mut out = Raster::filled(
        request.width,
        request.height,
        &no_data,
        coverage.palette().cloned(),
    )?;

    let rows = store.tiles_in_window(coverage.name(), matched.level, &request.envelope)?;
    debug!("{} tiles intersect the window", rows.len());
    for row in rows {
        let decoded = decode_tile(
            matched.scale,
            &row.odd,
            row.even.as_deref(),
            coverage.palette().cloned(),
        )
        .and_then(|tile| match coverage.no_data() {
            Some(pixel) => tile.with_no_data(pixel.clone()),
            None => Ok(tile),
        });
        match decoded {
            Ok(tile) => blit::blit_tile(
                &tile,
                &mut out,
                matched.x_res,
                matched.y_res,
                request.envelope.min_x,
                request.envelope.max_y,
                row.min_x,
                row.max_y,
            ),
            Err(error) => {
                // The tile's footprint stays NoData in the output.
                warn!("skipping tile {}: {error}", row.tile_id);
            }
        }
    }

    let mut out = out.with_georeference(Georeference {
        srid: coverage.srid(),
        min_x: request.envelope.min_x,
        min_y: request.envelope.min_y,
        max_x: request.envelope.max_x,
        max_y: request.envelope.max_y,
        x_resolution: matched.x_res,
        y_resolution: matched.y_res,
    });
    if let Some(pixel) = coverage.no_data() {
        out = out.with_no_data(pixel.clone())?;
    }
    Ok(out)
}

/// [`render_window`] followed by a symbolizer pass.
///
/// LUT construction uses the coverage's persisted statistics; when
/// none were stored the rendered window itself is sampled.
pub fn render_symbolized<S: TileStore + ?Sized>(
    store: &S,
    coverage: &Coverage,
    request: &RenderRequest,
    symbolizer: &RasterSymbolizer,
) -> RastileResult<Raster> {
    let rendered = render_window(store, coverage, request)?;
    if matches!(symbolizer, RasterSymbolizer::RawCopy) {
        return Ok(rendered);
    }
    let stats = match store.statistics(coverage.name())? {
        Some(stats) => stats,
        None => {
            let mut stats =
                RasterStatistics::new(coverage.sample_type(), coverage.bands())?;
            stats.update(&rendered);
            stats
        }
    };
    apply_symbolizer(&rendered, &stats, symbolizer)
}

/// Build a shaded-relief mask for a DataGrid coverage window.
///
/// Renders the window padded by one pixel on every edge, then applies
/// Horn's formula per cell with the engine's fixed sun position
/// (altitude 45 degrees, azimuth 315 degrees). Cells whose 3x3 window
/// touches NoData yield the −1 marker.
pub fn shaded_relief_mask<S: TileStore + ?Sized>(
    store: &S,
    coverage: &Coverage,
    request: &RenderRequest,
    relief_factor: f64,
    scale_factor: f64,
) -> RastileResult<Vec<f32>> {
    if coverage.pixel_type() != PixelType::DataGrid || coverage.bands() != 1 {
        return Err(RastileError::invalid(
            "shaded relief requires a single-band DataGrid coverage",
        ));
    }
    let no_data_pixel = coverage
        .no_data()
        .ok_or_else(|| RastileError::invalid("shaded relief requires a NoData value"))?;
    let no_data = no_data_pixel.sample(0)?.as_f64();

    let levels = store.levels(coverage.name())?;
    let matched = find_matching_resolution(&levels, request.x_res, request.y_res)?;
    let padded_request = RenderRequest {
        envelope: Envelope::new(
            request.envelope.min_x - matched.x_res,
            request.envelope.min_y - matched.y_res,
            request.envelope.max_x + matched.x_res,
            request.envelope.max_y + matched.y_res,
        ),
        width: request.width + 2,
        height: request.height + 2,
        x_res: request.x_res,
        y_res: request.y_res,
    };
    let rendered = render_window(store, coverage, &padded_request)?;

    let stride = padded_request.width as usize;
    let mut grid = vec![0.0f64; stride * padded_request.height as usize];
    for row in 0..padded_request.height {
        for col in 0..padded_request.width {
            grid[row as usize * stride + col as usize] = rendered.sample_f64(row, col, 0);
        }
    }
    Ok(relief::shaded_relief(
        &grid,
        request.width as usize,
        request.height as usize,
        no_data,
        relief_factor,
        scale_factor,
    ))
}
