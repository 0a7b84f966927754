//! Persistence: the storage traits the core consumes, and a SQLite
//! implementation of them.
//!
//! The engine never talks SQL directly; it reads coverages, level
//! rows and spatially-matching tile rows through [`TileStore`] and
//! writes through [`TileStoreMut`]. `SqliteStore` maps both onto the
//! relational schema:
//!
//! - `raster_coverages` — one row per coverage;
//! - `<name>_levels` — resolution quadruples per pyramid level;
//! - `<name>_tiles` — tile MBR plus the serialized envelope geometry;
//! - `<name>_tile_data` — the Odd/Even blocks.

use crate::codec::EncodedTile;
use crate::coverage::Coverage;
use crate::envelope::Envelope;
use crate::error::RastileResult;
use crate::pyramid::PyramidLevel;
use crate::stats::RasterStatistics;

/// One tile row produced by the spatial predicate.
#[derive(Debug, Clone)]
pub struct TileRow {
    /// Tile identifier.
    pub tile_id: i64,
    /// Western edge of the tile extent.
    pub min_x: f64,
    /// Northern edge of the tile extent.
    pub max_y: f64,
    /// The Odd block.
    pub odd: Vec<u8>,
    /// The Even block, when one was persisted.
    pub even: Option<Vec<u8>>,
}

/// Read access to a persisted coverage.
pub trait TileStore {
    /// Load a coverage descriptor by name.
    fn coverage(&self, name: &str) -> RastileResult<Coverage>;

    /// Load every pyramid level row of a coverage.
    fn levels(&self, name: &str) -> RastileResult<Vec<PyramidLevel>>;

    /// Load the persisted coverage statistics, if any.
    fn statistics(&self, name: &str) -> RastileResult<Option<RasterStatistics>>;

    /// The tile rows of one level intersecting a window, with their
    /// blocks.
    fn tiles_in_window(
        &self,
        name: &str,
        level: u32,
        window: &Envelope,
    ) -> RastileResult<Vec<TileRow>>;
}

/// Write access to a persisted coverage.
pub trait TileStoreMut: TileStore {
    /// Register a coverage and create its tables.
    fn create_coverage(&mut self, coverage: &Coverage) -> RastileResult<()>;

    /// Insert or replace one pyramid level row.
    fn register_level(&mut self, name: &str, level: &PyramidLevel) -> RastileResult<()>;

    /// Append one tile; returns its id. Tiles are immutable once
    /// written.
    fn insert_tile(
        &mut self,
        name: &str,
        level: u32,
        srid: i32,
        envelope: &Envelope,
        tile: &EncodedTile,
    ) -> RastileResult<i64>;

    /// Store (replacing) the coverage statistics.
    fn put_statistics(&mut self, name: &str, stats: &RasterStatistics) -> RastileResult<()>;
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "sqlite")]
mod sqlite {
    use rusqlite::{Connection, OptionalExtension};

    use super::{TileRow, TileStore, TileStoreMut};
    use crate::codec::{Compression, EncodedTile};
    use crate::coverage::{deserialize_no_data, serialize_no_data, Coverage};
    use crate::envelope::Envelope;
    use crate::error::{RastileError, RastileResult};
    use crate::palette::Palette;
    use crate::pixel::{PixelType, SampleType};
    use crate::pyramid::PyramidLevel;
    use crate::stats::RasterStatistics;

    /// A coverage store backed by a SQLite database.
    #[derive(Debug)]
    pub struct SqliteStore {
        conn: Connection,
    }

    /// Coverage names become table-name prefixes; restrict them so
    /// identifiers never need escaping.
    fn check_name(name: &str) -> RastileResult<()> {
        let valid = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
            && !name.as_bytes()[0].is_ascii_digit();
        if valid {
            Ok(())
        } else {
            Err(RastileError::invalid(format!(
                "coverage name {name:?} must be alphanumeric/underscore"
            )))
        }
    }

    impl SqliteStore {
        /// Open (creating as needed) a database file.
        pub fn open(path: &str) -> RastileResult<Self> {
            Ok(Self::new(Connection::open(path)?))
        }

        /// Open a private in-memory database.
        pub fn open_in_memory() -> RastileResult<Self> {
            Ok(Self::new(Connection::open_in_memory()?))
        }

        /// Wrap an existing connection.
        pub fn new(conn: Connection) -> Self {
            Self { conn }
        }

        /// The underlying connection.
        pub fn connection(&self) -> &Connection {
            &self.conn
        }

        fn ensure_registry(&self) -> RastileResult<()> {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS raster_coverages (
                    coverage_name TEXT PRIMARY KEY,
                    sample_type TEXT NOT NULL,
                    pixel_type TEXT NOT NULL,
                    num_bands INTEGER NOT NULL,
                    compression TEXT NOT NULL,
                    quality INTEGER NOT NULL,
                    tile_width INTEGER NOT NULL,
                    tile_height INTEGER NOT NULL,
                    horz_resolution DOUBLE NOT NULL,
                    vert_resolution DOUBLE NOT NULL,
                    srid INTEGER NOT NULL,
                    nodata_pixel BLOB,
                    palette BLOB,
                    statistics BLOB
                )",
            )?;
            Ok(())
        }
    }

    impl TileStore for SqliteStore {
        fn coverage(&self, name: &str) -> RastileResult<Coverage> {
            check_name(name)?;
            self.ensure_registry()?;
            let mut stmt = self.conn.prepare(
                "SELECT sample_type, pixel_type, num_bands, compression, quality, \
                 tile_width, tile_height, horz_resolution, vert_resolution, srid, \
                 nodata_pixel, palette \
                 FROM raster_coverages WHERE Lower(coverage_name) = Lower(?1)",
            )?;
            let row = stmt
                .query_row([name], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u8>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u8>(4)?,
                        row.get::<_, u16>(5)?,
                        row.get::<_, u16>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, f64>(8)?,
                        row.get::<_, i32>(9)?,
                        row.get::<_, Option<Vec<u8>>>(10)?,
                        row.get::<_, Option<Vec<u8>>>(11)?,
                    ))
                })
                .optional()?
                .ok_or_else(|| {
                    RastileError::invalid(format!("coverage {name:?} is not registered"))
                })?;
            let (
                sample_label,
                pixel_label,
                bands,
                compression_label,
                quality,
                tile_width,
                tile_height,
                x_res,
                y_res,
                srid,
                no_data_blob,
                palette_blob,
            ) = row;
            let no_data = no_data_blob
                .as_deref()
                .map(deserialize_no_data)
                .transpose()?;
            let palette = palette_blob
                .as_deref()
                .map(Palette::deserialize)
                .transpose()?;
            Coverage::with_palette(
                name,
                SampleType::from_label(&sample_label)?,
                PixelType::from_label(&pixel_label)?,
                bands,
                Compression::from_label(&compression_label)?,
                quality,
                tile_width,
                tile_height,
                srid,
                x_res,
                y_res,
                no_data,
                palette,
            )
        }

        fn levels(&self, name: &str) -> RastileResult<Vec<PyramidLevel>> {
            check_name(name)?;
            let mut stmt = self.conn.prepare(&format!(
                "SELECT pyramid_level, x_resolution_1_1, y_resolution_1_1, \
                 x_resolution_1_2, y_resolution_1_2, x_resolution_1_4, y_resolution_1_4, \
                 x_resolution_1_8, y_resolution_1_8 \
                 FROM \"{name}_levels\" ORDER BY pyramid_level"
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok(PyramidLevel {
                    level: row.get(0)?,
                    resolutions: [
                        (row.get(1)?, row.get(2)?),
                        (row.get(3)?, row.get(4)?),
                        (row.get(5)?, row.get(6)?),
                        (row.get(7)?, row.get(8)?),
                    ],
                })
            })?;
            let mut levels = Vec::new();
            for level in rows {
                levels.push(level?);
            }
            Ok(levels)
        }

        fn statistics(&self, name: &str) -> RastileResult<Option<RasterStatistics>> {
            check_name(name)?;
            self.ensure_registry()?;
            let blob: Option<Vec<u8>> = self
                .conn
                .query_row(
                    "SELECT statistics FROM raster_coverages \
                     WHERE Lower(coverage_name) = Lower(?1)",
                    [name],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            blob.as_deref().map(RasterStatistics::deserialize).transpose()
        }

        fn tiles_in_window(
            &self,
            name: &str,
            level: u32,
            window: &Envelope,
        ) -> RastileResult<Vec<TileRow>> {
            check_name(name)?;
            let mut stmt = self.conn.prepare(&format!(
                "SELECT t.tile_id, t.min_x, t.max_y, d.tile_data_odd, d.tile_data_even \
                 FROM \"{name}_tiles\" t \
                 JOIN \"{name}_tile_data\" d ON d.tile_id = t.tile_id \
                 WHERE t.pyramid_level = ?1 \
                 AND t.max_x >= ?2 AND t.min_x <= ?3 \
                 AND t.max_y >= ?4 AND t.min_y <= ?5 \
                 ORDER BY t.tile_id"
            ))?;
            let rows = stmt.query_map(
                rusqlite::params![
                    level,
                    window.min_x,
                    window.max_x,
                    window.min_y,
                    window.max_y
                ],
                |row| {
                    Ok(TileRow {
                        tile_id: row.get(0)?,
                        min_x: row.get(1)?,
                        max_y: row.get(2)?,
                        odd: row.get(3)?,
                        even: row.get(4)?,
                    })
                },
            )?;
            let mut tiles = Vec::new();
            for tile in rows {
                tiles.push(tile?);
            }
            Ok(tiles)
        }
    }

    impl TileStoreMut for SqliteStore {
        fn create_coverage(&mut self, coverage: &Coverage) -> RastileResult<()> {
            let name = coverage.name();
            check_name(name)?;
            self.ensure_registry()?;
            let tx = self.conn.transaction()?;
            tx.execute(
                "INSERT INTO raster_coverages (coverage_name, sample_type, pixel_type, \
                 num_bands, compression, quality, tile_width, tile_height, \
                 horz_resolution, vert_resolution, srid, nodata_pixel, palette) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    name,
                    coverage.sample_type().label(),
                    coverage.pixel_type().label(),
                    coverage.bands(),
                    coverage.compression().label(),
                    coverage.quality(),
                    coverage.tile_width(),
                    coverage.tile_height(),
                    coverage.x_resolution(),
                    coverage.y_resolution(),
                    coverage.srid(),
                    coverage.no_data().map(serialize_no_data),
                    coverage.palette().map(|p| p.serialize()),
                ],
            )?;
            tx.execute_batch(&format!(
                "CREATE TABLE \"{name}_levels\" (
                    pyramid_level INTEGER PRIMARY KEY,
                    x_resolution_1_1 DOUBLE,
                    y_resolution_1_1 DOUBLE,
                    x_resolution_1_2 DOUBLE,
                    y_resolution_1_2 DOUBLE,
                    x_resolution_1_4 DOUBLE,
                    y_resolution_1_4 DOUBLE,
                    x_resolution_1_8 DOUBLE,
                    y_resolution_1_8 DOUBLE
                );
                CREATE TABLE \"{name}_tiles\" (
                    tile_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    pyramid_level INTEGER NOT NULL,
                    min_x DOUBLE NOT NULL,
                    min_y DOUBLE NOT NULL,
                    max_x DOUBLE NOT NULL,
                    max_y DOUBLE NOT NULL,
                    geometry BLOB NOT NULL
                );
                CREATE INDEX \"idx_{name}_tiles_mbr\" ON \"{name}_tiles\" \
                    (pyramid_level, min_x, max_x, min_y, max_y);
                CREATE TABLE \"{name}_tile_data\" (
                    tile_id INTEGER PRIMARY KEY,
                    tile_data_odd BLOB NOT NULL,
                    tile_data_even BLOB
                );"
            ))?;
            tx.commit()?;
            Ok(())
        }

        fn register_level(&mut self, name: &str, level: &PyramidLevel) -> RastileResult<()> {
            check_name(name)?;
            self.conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO \"{name}_levels\" (pyramid_level, \
                     x_resolution_1_1, y_resolution_1_1, x_resolution_1_2, y_resolution_1_2, \
                     x_resolution_1_4, y_resolution_1_4, x_resolution_1_8, y_resolution_1_8) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                rusqlite::params![
                    level.level,
                    level.resolutions[0].0,
                    level.resolutions[0].1,
                    level.resolutions[1].0,
                    level.resolutions[1].1,
                    level.resolutions[2].0,
                    level.resolutions[2].1,
                    level.resolutions[3].0,
                    level.resolutions[3].1,
                ],
            )?;
            Ok(())
        }

        fn insert_tile(
            &mut self,
            name: &str,
            level: u32,
            srid: i32,
            envelope: &Envelope,
            tile: &EncodedTile,
        ) -> RastileResult<i64> {
            check_name(name)?;
            let tx = self.conn.transaction()?;
            tx.execute(
                &format!(
                    "INSERT INTO \"{name}_tiles\" \
                     (pyramid_level, min_x, min_y, max_x, max_y, geometry) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                rusqlite::params![
                    level,
                    envelope.min_x,
                    envelope.min_y,
                    envelope.max_x,
                    envelope.max_y,
                    envelope.to_blob(srid),
                ],
            )?;
            let tile_id = tx.last_insert_rowid();
            tx.execute(
                &format!(
                    "INSERT INTO \"{name}_tile_data\" \
                     (tile_id, tile_data_odd, tile_data_even) VALUES (?1, ?2, ?3)"
                ),
                rusqlite::params![tile_id, &tile.odd[..], tile.even.as_deref()],
            )?;
            tx.commit()?;
            Ok(tile_id)
        }

        fn put_statistics(&mut self, name: &str, stats: &RasterStatistics) -> RastileResult<()> {
            check_name(name)?;
            let updated = self.conn.execute(
                "UPDATE raster_coverages SET statistics = ?2 \
                 WHERE Lower(coverage_name) = Lower(?1)",
                rusqlite::params![name, stats.serialize()],
            )?;
            if updated == 0 {
                return Err(RastileError::invalid(format!(
                    "coverage {name:?} is not registered"
                )));
            }
            Ok(())
        }
    }

}
