//! Source-reader contracts for the ingest pipeline.
//!
//! File parsing lives outside the engine; readers for TIFF, ASCII
//! grids and the other supported formats implement [`RasterSource`]
//! and hand the engine tile-aligned windows. [`MemorySource`] adapts
//! an in-memory raster to the same contract.

use crate::error::{RastileError, RastileResult};
use crate::pixel::{Pixel, PixelType, SampleType};
use crate::raster::{Georeference, Raster};

/// Open-time metadata a source reader reports.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Source width in pixels.
    pub width: u32,
    /// Source height in pixels.
    pub height: u32,
    /// Sample type of every band.
    pub sample_type: SampleType,
    /// Pixel interpretation.
    pub pixel_type: PixelType,
    /// Number of bands.
    pub bands: u8,
    /// Spatial reference, when the source is georeferenced.
    pub srid: Option<i32>,
    /// Horizontal pixel size.
    pub x_resolution: f64,
    /// Vertical pixel size.
    pub y_resolution: f64,
    /// Western edge.
    pub min_x: f64,
    /// Southern edge.
    pub min_y: f64,
    /// Eastern edge.
    pub max_x: f64,
    /// Northern edge.
    pub max_y: f64,
    /// The source's NoData value, if it declares one.
    pub no_data: Option<Pixel>,
}

/// A reader delivering tile-aligned raster windows.
///
/// Implementations must honor two contracts:
///
/// - windows are requested at positions that are multiples of the
///   coverage tile size and always at full tile dimensions; the area
///   past the source's edge arrives NoData-filled and masked
///   transparent;
/// - integral sample values must be produced from the parsed numeric
///   value directly — never routed through a narrower signed
///   temporary (an ASCII grid value above 127 must arrive intact).
///
/// An ASCII grid reader additionally parses the fixed 6-line header
/// (`ncols`, `nrows`, `xllcorner`, `yllcorner`, `cellsize`,
/// `NODATA_value`) to populate [`SourceInfo`].
pub trait RasterSource {
    /// The source metadata.
    fn info(&self) -> &SourceInfo;

    /// Read a `width * height` window anchored at
    /// `(start_row, start_col)`.
    fn read_window(
        &mut self,
        start_row: u32,
        start_col: u32,
        width: u16,
        height: u16,
    ) -> RastileResult<Raster>;
}

/// A [`RasterSource`] over a raster already in memory.
#[derive(Debug)]
pub struct MemorySource {
    raster: Raster,
    info: SourceInfo,
}

impl MemorySource {
    /// Wrap a raster. Georeferencing comes from the raster when set,
    /// else from the pixel extent at unit resolution.
    pub fn new(raster: Raster) -> Self {
        let (min_x, min_y, max_x, max_y) = raster.extent();
        let (srid, x_resolution, y_resolution) = match raster.georeference() {
            Some(geo) => (Some(geo.srid), geo.x_resolution, geo.y_resolution),
            None => (None, 1.0, 1.0),
        };
        let info = SourceInfo {
            width: raster.width() as u32,
            height: raster.height() as u32,
            sample_type: raster.sample_type(),
            pixel_type: raster.pixel_type(),
            bands: raster.bands(),
            srid,
            x_resolution,
            y_resolution,
            min_x,
            min_y,
            max_x,
            max_y,
            no_data: raster.no_data().cloned(),
        };
        Self { raster, info }
    }

    /// Wrap a raster after attaching the given georeferencing.
    pub fn with_georeference(raster: Raster, geo: Georeference) -> Self {
        Self::new(raster.with_georeference(geo))
    }

    /// Unwrap the underlying raster.
    pub fn into_raster(self) -> Raster {
        self.raster
    }
}

impl RasterSource for MemorySource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read_window(
        &mut self,
        start_row: u32,
        start_col: u32,
        width: u16,
        height: u16,
    ) -> RastileResult<Raster> {
        let src = &self.raster;
        if start_row >= src.height() as u32 || start_col >= src.width() as u32 {
            return Err(RastileError::invalid(format!(
                "window origin ({start_row}, {start_col}) outside the source"
            )));
        }
        let fill = match src.no_data() {
            Some(pixel) => pixel.clone(),
            None => Pixel::new(src.sample_type(), src.pixel_type(), src.bands())?,
        };
        let mut out = Raster::filled(width, height, &fill, src.palette().cloned())?;

        let stride = src.pixel_stride();
        let rows = (src.height() as u32 - start_row).min(height as u32) as usize;
        let cols = (src.width() as u32 - start_col).min(width as u32) as usize;
        let padded = rows < height as usize || cols < width as usize;

        for row in 0..rows {
            let src_base =
                ((start_row as usize + row) * src.width() as usize + start_col as usize) * stride;
            let dst_base = row * width as usize * stride;
            let src_row = &src.data()[src_base..src_base + cols * stride];
            out.data_mut()[dst_base..dst_base + cols * stride].copy_from_slice(src_row);
        }

        if padded || src.mask().is_some() {
            let mut mask = vec![0u8; width as usize * height as usize];
            for row in 0..rows {
                for col in 0..cols {
                    let opaque = match src.mask() {
                        Some(src_mask) => {
                            src_mask[(start_row as usize + row) * src.width() as usize
                                + start_col as usize
                                + col]
                        }
                        None => 1,
                    };
                    mask[row * width as usize + col] = opaque;
                }
            }
            out = out.with_mask(mask)?;
        }
        if let Some(pixel) = src.no_data() {
            out = out.with_no_data(pixel.clone())?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MemorySource {
        let data: Vec<u8> = (0..100).collect();
        let raster = Raster::new(
            10,
            10,
            SampleType::UInt8,
            PixelType::Grayscale,
            1,
            data,
            None,
        )
        .unwrap()
        .with_no_data(Pixel::grayscale(255))
        .unwrap();
        MemorySource::new(raster)
    }

    #[test]
    fn interior_window() {
        let mut source = source();
        let window = source.read_window(2, 3, 4, 4).unwrap();
        assert_eq!(window.sample_f64(0, 0, 0), 23.0);
        assert_eq!(window.sample_f64(3, 3, 0), 56.0);
        assert!(window.mask().is_none());
    }

    #[test]
    fn edge_window_padded_and_masked() {
        let mut source = source();
        let window = source.read_window(8, 8, 4, 4).unwrap();
        assert_eq!(window.sample_f64(0, 0, 0), 88.0);
        assert_eq!(window.sample_f64(1, 1, 0), 99.0);
        // Padding carries the NoData fill and a transparent mask.
        assert_eq!(window.sample_f64(2, 2, 0), 255.0);
        let mask = window.mask().unwrap();
        assert_eq!(mask[0], 1);
        assert_eq!(mask[2 * 4 + 2], 0);
    }

    #[test]
    fn window_outside_rejected() {
        let mut source = source();
        assert!(source.read_window(10, 0, 4, 4).is_err());
    }

    #[test]
    fn info_reflects_georeference() {
        let raster = Raster::new(
            4,
            2,
            SampleType::UInt8,
            PixelType::Grayscale,
            1,
            vec![0; 8],
            None,
        )
        .unwrap();
        let source = MemorySource::with_georeference(
            raster,
            Georeference {
                srid: 4326,
                min_x: 10.0,
                min_y: 20.0,
                max_x: 14.0,
                max_y: 22.0,
                x_resolution: 1.0,
                y_resolution: 1.0,
            },
        );
        assert_eq!(source.info().srid, Some(4326));
        assert_eq!(source.info().max_y, 22.0);
    }
}
