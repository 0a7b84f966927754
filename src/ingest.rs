//! The ingest pipeline: sections, the tiler and the encode/persist
//! loop.

use log::debug;

use crate::codec::{encode_tile, Compression};
use crate::coverage::Coverage;
use crate::envelope::Envelope;
use crate::error::{RastileError, RastileResult};
use crate::pyramid::PyramidLevel;
use crate::raster::{Georeference, Raster};
use crate::source::{MemorySource, RasterSource};
use crate::stats::RasterStatistics;
use crate::store::TileStoreMut;

/// A named logical import unit: one raster plus its import defaults.
#[derive(Debug)]
pub struct Section {
    /// Section name, recorded for diagnostics.
    pub name: String,
    /// Compression override for this import; the coverage's setting
    /// applies when absent.
    pub compression: Option<Compression>,
    /// Preferred tile width when deriving a coverage from this
    /// section.
    pub tile_width: Option<u16>,
    /// Preferred tile height when deriving a coverage from this
    /// section.
    pub tile_height: Option<u16>,
    /// The section's pixels.
    pub raster: Raster,
}

impl Section {
    /// Create a section with no overrides.
    pub fn new(name: impl Into<String>, raster: Raster) -> Self {
        Self {
            name: name.into(),
            compression: None,
            tile_width: None,
            tile_height: None,
            raster,
        }
    }
}

/// One tile cut from a source, ready to encode.
#[derive(Debug)]
pub struct Tile {
    /// Pyramid level the tile belongs to.
    pub level: u32,
    /// Tile row within the section grid.
    pub row: u32,
    /// Tile column within the section grid.
    pub col: u32,
    /// The tile pixels, always at full coverage tile size.
    pub raster: Raster,
    /// The tile's geographic footprint.
    pub envelope: Envelope,
}

/// Cut a source into coverage-sized tiles, invoking `visit` for each.
///
/// Tiles are visited row-major. Edge tiles arrive padded to the full
/// tile size with their padding masked transparent, so encoding and
/// statistics see a uniform tile geometry.
pub fn for_each_tile<Src, F>(
    coverage: &Coverage,
    source: &mut Src,
    mut visit: F,
) -> RastileResult<()>
where
    Src: RasterSource + ?Sized,
    F: FnMut(Tile) -> RastileResult<()>,
{
    let info = source.info().clone();
    if info.sample_type != coverage.sample_type()
        || info.pixel_type != coverage.pixel_type()
        || info.bands != coverage.bands()
    {
        return Err(RastileError::invalid(format!(
            "source shape {} {} x{} does not match the coverage",
            info.sample_type.label(),
            info.pixel_type.label(),
            info.bands
        )));
    }
    for (resolution, requested) in [
        (info.x_resolution, coverage.x_resolution()),
        (info.y_resolution, coverage.y_resolution()),
    ] {
        if (resolution - requested).abs() > requested / 100.0 {
            return Err(RastileError::invalid(format!(
                "source resolution {resolution} does not match the coverage ({requested})"
            )));
        }
    }

    let tile_width = coverage.tile_width();
    let tile_height = coverage.tile_height();
    let tiles_across = (info.width as usize).div_ceil(tile_width as usize) as u32;
    let tiles_down = (info.height as usize).div_ceil(tile_height as usize) as u32;

    for row in 0..tiles_down {
        for col in 0..tiles_across {
            let raster = source.read_window(
                row * tile_height as u32,
                col * tile_width as u32,
                tile_width,
                tile_height,
            )?;
            let tile_min_x =
                info.min_x + col as f64 * tile_width as f64 * coverage.x_resolution();
            let tile_max_y =
                info.max_y - row as f64 * tile_height as f64 * coverage.y_resolution();
            let envelope = Envelope::new(
                tile_min_x,
                tile_max_y - tile_height as f64 * coverage.y_resolution(),
                tile_min_x + tile_width as f64 * coverage.x_resolution(),
                tile_max_y,
            );
            visit(Tile {
                level: 0,
                row,
                col,
                raster,
                envelope,
            })?;
        }
    }
    Ok(())
}

/// Ingest a source into a coverage: tile, encode, persist, and
/// accumulate statistics.
///
/// Any failure is fatal for the import. Returns the statistics
/// accumulated over this source (also merged into the coverage's
/// persisted statistics).
pub fn ingest_source<St, Src>(
    store: &mut St,
    coverage: &Coverage,
    source: &mut Src,
) -> RastileResult<RasterStatistics>
where
    St: TileStoreMut + ?Sized,
    Src: RasterSource + ?Sized,
{
    ingest_with_compression(store, coverage, source, coverage.compression())
}

fn ingest_with_compression<St, Src>(
    store: &mut St,
    coverage: &Coverage,
    source: &mut Src,
    compression: Compression,
) -> RastileResult<RasterStatistics>
where
    St: TileStoreMut + ?Sized,
    Src: RasterSource + ?Sized,
{
    let mut totals = RasterStatistics::new(coverage.sample_type(), coverage.bands())?;
    let mut tile_count = 0u32;
    let name = coverage.name().to_owned();
    let srid = coverage.srid();
    let quality = coverage.quality();

    // One tile plus its encoded blocks in flight at a time.
    for_each_tile(coverage, source, |tile| {
        let mut tile_stats =
            RasterStatistics::new(coverage.sample_type(), coverage.bands())?;
        tile_stats.update(&tile.raster);
        totals.merge(&tile_stats)?;
        let encoded = encode_tile(&tile.raster, compression, quality, true)?;
        store.insert_tile(&name, 0, srid, &tile.envelope, &encoded)?;
        tile_count += 1;
        Ok(())
    })?;
    debug!("ingested {tile_count} tiles into {name}");

    store.register_level(&name, &PyramidLevel::for_coverage(coverage, 0))?;

    let merged = match store.statistics(&name)? {
        Some(mut existing) => {
            existing.merge(&totals)?;
            existing
        }
        None => totals.clone(),
    };
    store.put_statistics(&name, &merged)?;
    Ok(totals)
}

/// Ingest an in-memory section.
///
/// An unreferenced section raster is georeferenced at the coverage
/// resolution with its north-west corner at the origin.
pub fn ingest_section<St>(
    store: &mut St,
    coverage: &Coverage,
    section: &Section,
) -> RastileResult<RasterStatistics>
where
    St: TileStoreMut + ?Sized,
{
    debug!("ingesting section {:?}", section.name);
    let raster = section.raster.clone();
    let raster = if raster.georeference().is_some() {
        raster
    } else {
        let width = raster.width() as f64 * coverage.x_resolution();
        let height = raster.height() as f64 * coverage.y_resolution();
        raster.with_georeference(Georeference {
            srid: coverage.srid(),
            min_x: 0.0,
            min_y: 0.0,
            max_x: width,
            max_y: height,
            x_resolution: coverage.x_resolution(),
            y_resolution: coverage.y_resolution(),
        })
    };
    let mut source = MemorySource::new(raster);
    let compression = section.compression.unwrap_or_else(|| coverage.compression());
    ingest_with_compression(store, coverage, &mut source, compression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{Pixel, PixelType, SampleType};

    fn coverage() -> Coverage {
        Coverage::new(
            "scan",
            SampleType::UInt8,
            PixelType::Grayscale,
            1,
            Compression::Deflate,
            100,
            256,
            256,
            0,
            1.0,
            1.0,
            Some(Pixel::grayscale(0)),
        )
        .unwrap()
    }

    fn source(width: u16, height: u16) -> MemorySource {
        let data: Vec<u8> = (0..width as usize * height as usize)
            .map(|i| (i % 200) as u8 + 1)
            .collect();
        let raster = Raster::new(
            width,
            height,
            SampleType::UInt8,
            PixelType::Grayscale,
            1,
            data,
            None,
        )
        .unwrap()
        .with_georeference(Georeference {
            srid: 0,
            min_x: 0.0,
            min_y: 0.0,
            max_x: width as f64,
            max_y: height as f64,
            x_resolution: 1.0,
            y_resolution: 1.0,
        });
        MemorySource::new(raster)
    }

    #[test]
    fn tiler_covers_the_grid() {
        let coverage = coverage();
        let mut source = source(600, 300);
        let mut seen = Vec::new();
        for_each_tile(&coverage, &mut source, |tile| {
            assert_eq!(tile.raster.width(), 256);
            assert_eq!(tile.raster.height(), 256);
            seen.push((tile.row, tile.col, tile.envelope));
            Ok(())
        })
        .unwrap();
        // 600x300 at 256-pixel tiles is a 3x2 grid.
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[5].1, 2);
        // First tile extent hangs off the source top-left corner.
        assert_eq!(seen[0].2, Envelope::new(0.0, 44.0, 256.0, 300.0));
    }

    #[test]
    fn shape_mismatch_is_fatal() {
        let coverage = coverage();
        let raster = Raster::new(
            10,
            10,
            SampleType::UInt16,
            PixelType::DataGrid,
            1,
            vec![0; 200],
            None,
        )
        .unwrap();
        let mut source = MemorySource::new(raster);
        let result = for_each_tile(&coverage, &mut source, |_| Ok(()));
        assert!(matches!(result, Err(RastileError::InvalidArgument(_))));
    }

    #[test]
    fn resolution_mismatch_is_fatal() {
        let coverage = coverage();
        let raster = Raster::new(
            10,
            10,
            SampleType::UInt8,
            PixelType::Grayscale,
            1,
            vec![0; 100],
            None,
        )
        .unwrap()
        .with_georeference(Georeference {
            srid: 0,
            min_x: 0.0,
            min_y: 0.0,
            max_x: 20.0,
            max_y: 20.0,
            x_resolution: 2.0,
            y_resolution: 2.0,
        });
        let mut source = MemorySource::new(raster);
        assert!(for_each_tile(&coverage, &mut source, |_| Ok(())).is_err());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn ingest_persists_tiles_levels_and_statistics() {
        use crate::store::{SqliteStore, TileStore, TileStoreMut};

        let coverage = coverage();
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.create_coverage(&coverage).unwrap();

        let section = Section::new("sheet_1", source(600, 300).into_raster());
        let stats = ingest_section(&mut store, &coverage, &section).unwrap();
        // 600 * 300 source pixels are sampled; the padding is NoData.
        assert_eq!(stats.count() + stats.no_data_count(), 6.0 * 256.0 * 256.0);
        assert_eq!(stats.count(), 600.0 * 300.0);

        let levels = store.levels("scan").unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].resolutions[0], (1.0, 1.0));

        let window = Envelope::new(0.0, 0.0, 600.0, 300.0);
        let tiles = store.tiles_in_window("scan", 0, &window).unwrap();
        assert_eq!(tiles.len(), 6);

        assert!(store.statistics("scan").unwrap().is_some());
    }
}
