#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod codec;
mod coverage;
mod envelope;
pub mod error;
mod ingest;
mod palette;
mod pixel;
mod pyramid;
mod raster;
pub mod render;
mod source;
mod stats;
pub mod store;

pub use codec::{decode_tile, encode_tile, Compression, EncodedTile, Scale};
pub use coverage::Coverage;
pub use envelope::Envelope;
pub use error::{RastileError, RastileResult};
pub use ingest::{for_each_tile, ingest_section, ingest_source, Section, Tile};
pub use palette::{Palette, PaletteEntry};
pub use pixel::{Pixel, PixelType, Sample, SampleType};
pub use pyramid::{find_matching_resolution, PyramidLevel, ResolutionMatch};
pub use raster::{Georeference, Raster};
pub use render::symbolizer::{
    apply_symbolizer, ColorMap, ColorMapEntry, ContrastEnhancement, MonoBandSymbolizer,
    RasterSymbolizer, TripleBandSymbolizer,
};
pub use render::{
    render_symbolized, render_window, shaded_relief_mask, RenderRequest,
};
pub use source::{MemorySource, RasterSource, SourceInfo};
pub use stats::{BandStatistics, PooledVariance, RasterStatistics};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use store::{TileRow, TileStore, TileStoreMut};
