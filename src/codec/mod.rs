//! The binary tile codec: Odd/Even block format, sub-byte packers,
//! mask RLE and the compression back-end facade.

mod backends;
mod block;
mod decode;
pub(crate) mod rle;
pub(crate) mod subbyte;

pub use block::{encode_tile, EncodedTile};
pub use decode::decode_tile;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{RastileError, RastileResult};
use crate::pixel::{PixelType, SampleType};

/// Framing markers shared by every serialized object.
pub(crate) mod markers {
    pub const ODD_BLOCK_START: u8 = 0xfa;
    pub const ODD_BLOCK_END: u8 = 0xf0;
    pub const EVEN_BLOCK_START: u8 = 0xdb;
    pub const EVEN_BLOCK_END: u8 = 0xd0;
    pub const LITTLE_ENDIAN: u8 = 0x01;
    pub const BIG_ENDIAN: u8 = 0x00;
    pub const PALETTE_START: u8 = 0xa4;
    pub const PALETTE_END: u8 = 0xa5;
    pub const DATA_START: u8 = 0xc8;
    pub const DATA_END: u8 = 0xc9;
    pub const MASK_START: u8 = 0xb6;
    pub const MASK_END: u8 = 0xb7;
    pub const STATS_START: u8 = 0x27;
    pub const STATS_END: u8 = 0x2a;
    pub const BAND_STATS_START: u8 = 0x37;
    pub const BAND_STATS_END: u8 = 0x3a;
    pub const HISTOGRAM_START: u8 = 0x47;
    pub const HISTOGRAM_END: u8 = 0x4a;
    pub const NO_DATA_START: u8 = 0x03;
    pub const NO_DATA_END: u8 = 0x23;
    pub const SAMPLE_START: u8 = 0x06;
    pub const SAMPLE_END: u8 = 0x26;
}

/// The compression applied to a tile's pixel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Compression {
    /// Store raw bytes.
    None = 0x21,
    /// zlib deflate.
    Deflate = 0x22,
    /// LZMA (xz container).
    Lzma = 0x23,
    /// GIF, for paletted and sub-byte data.
    Gif = 0x24,
    /// PNG, lossless.
    Png = 0x25,
    /// JPEG, lossy; embeds the full image in the Odd block.
    Jpeg = 0x26,
    /// WebP, lossy; embeds the full image in the Odd block.
    LossyWebp = 0x27,
    /// WebP, lossless; embeds the full image in the Odd block.
    LosslessWebp = 0x28,
    /// CCITT Group 4 fax, 1-bit monochrome only.
    CcittFax4 = 0x2a,
}

impl Compression {
    /// The ASCII label persisted in `raster_coverages.compression`.
    pub fn label(&self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Deflate => "DEFLATE",
            Compression::Lzma => "LZMA",
            Compression::Gif => "GIF",
            Compression::Png => "PNG",
            Compression::Jpeg => "JPEG",
            Compression::LossyWebp => "LOSSY_WEBP",
            Compression::LosslessWebp => "LOSSLESS_WEBP",
            Compression::CcittFax4 => "CCITTFAX4",
        }
    }

    /// Parse a coverage label, case-insensitively.
    pub fn from_label(label: &str) -> RastileResult<Self> {
        let all = [
            Compression::None,
            Compression::Deflate,
            Compression::Lzma,
            Compression::Gif,
            Compression::Png,
            Compression::Jpeg,
            Compression::LossyWebp,
            Compression::LosslessWebp,
            Compression::CcittFax4,
        ];
        all.into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(label))
            .ok_or_else(|| RastileError::invalid(format!("unknown compression label {label:?}")))
    }

    /// Whether this codec embeds the full image in the Odd block and
    /// never produces an Even companion.
    pub(crate) fn is_full_image(&self) -> bool {
        matches!(
            self,
            Compression::Jpeg | Compression::LossyWebp | Compression::LosslessWebp
        )
    }

    /// Whether this is a lossy codec taking a quality setting.
    pub fn is_lossy(&self) -> bool {
        matches!(self, Compression::Jpeg | Compression::LossyWebp)
    }
}

/// Decode subsample factor applied to a stored tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scale {
    /// Full resolution; requires both blocks for split encodings.
    Full,
    /// 1:2, odd block only.
    Half,
    /// 1:4, odd block only.
    Quarter,
    /// 1:8, odd block only.
    Eighth,
}

impl Scale {
    /// The subsample stride, one of 1, 2, 4, 8.
    pub fn factor(&self) -> usize {
        match self {
            Scale::Full => 1,
            Scale::Half => 2,
            Scale::Quarter => 4,
            Scale::Eighth => 8,
        }
    }

    /// Build a scale from its stride.
    pub fn from_factor(factor: u8) -> RastileResult<Self> {
        match factor {
            1 => Ok(Scale::Full),
            2 => Ok(Scale::Half),
            4 => Ok(Scale::Quarter),
            8 => Ok(Scale::Eighth),
            other => Err(RastileError::invalid(format!("invalid scale factor {other}"))),
        }
    }

    /// Output length of an axis of `len` pixels subsampled at this
    /// scale: `ceil(len / factor)`.
    pub(crate) fn scaled_len(&self, len: usize) -> usize {
        len.div_ceil(self.factor())
    }
}

/// Checks a (sample, pixel, bands, compression) quadruple against the
/// encode self-consistency matrix. Decoders accept anything
/// historically written; encoders must reject combinations outside
/// this set.
pub(crate) fn encode_self_consistent(
    sample_type: SampleType,
    pixel_type: PixelType,
    bands: u8,
    compression: Compression,
) -> bool {
    if !crate::pixel::raster_self_consistent(sample_type, pixel_type, bands) {
        return false;
    }
    match pixel_type {
        PixelType::Monochrome => matches!(
            compression,
            Compression::None
                | Compression::Png
                | Compression::CcittFax4
                | Compression::Deflate
                | Compression::Lzma
                | Compression::Gif
        ),
        PixelType::Palette => matches!(
            compression,
            Compression::None
                | Compression::Deflate
                | Compression::Lzma
                | Compression::Gif
                | Compression::Png
        ),
        PixelType::Grayscale => matches!(
            compression,
            Compression::None
                | Compression::Deflate
                | Compression::Lzma
                | Compression::Gif
                | Compression::Png
                | Compression::Jpeg
                | Compression::LossyWebp
                | Compression::LosslessWebp
        ),
        PixelType::Rgb => matches!(
            compression,
            Compression::None
                | Compression::Deflate
                | Compression::Lzma
                | Compression::Png
                | Compression::Jpeg
                | Compression::LossyWebp
                | Compression::LosslessWebp
        ),
        PixelType::MultiBand | PixelType::DataGrid => matches!(
            compression,
            Compression::None | Compression::Deflate | Compression::Lzma
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matrix() {
        assert!(encode_self_consistent(
            SampleType::OneBit,
            PixelType::Monochrome,
            1,
            Compression::CcittFax4
        ));
        assert!(!encode_self_consistent(
            SampleType::UInt8,
            PixelType::Grayscale,
            1,
            Compression::CcittFax4
        ));
        assert!(encode_self_consistent(
            SampleType::UInt8,
            PixelType::Rgb,
            3,
            Compression::Jpeg
        ));
        assert!(!encode_self_consistent(
            SampleType::UInt8,
            PixelType::Rgb,
            3,
            Compression::Gif
        ));
        assert!(encode_self_consistent(
            SampleType::UInt16,
            PixelType::MultiBand,
            4,
            Compression::Lzma
        ));
        assert!(!encode_self_consistent(
            SampleType::UInt16,
            PixelType::MultiBand,
            4,
            Compression::Png
        ));
        assert!(encode_self_consistent(
            SampleType::Float64,
            PixelType::DataGrid,
            1,
            Compression::Deflate
        ));
        assert!(!encode_self_consistent(
            SampleType::Float64,
            PixelType::DataGrid,
            1,
            Compression::Jpeg
        ));
    }

    #[test]
    fn compression_labels() {
        assert_eq!(
            Compression::from_label("lossless_webp").unwrap(),
            Compression::LosslessWebp
        );
        assert_eq!(Compression::CcittFax4.label(), "CCITTFAX4");
        assert!(Compression::from_label("BZIP2").is_err());
    }

    #[test]
    fn scale_factors() {
        assert_eq!(Scale::from_factor(4).unwrap(), Scale::Quarter);
        assert!(Scale::from_factor(3).is_err());
        assert_eq!(Scale::Eighth.scaled_len(1024), 128);
        assert_eq!(Scale::Half.scaled_len(5), 3);
    }
}
