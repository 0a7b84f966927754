//! Primitive pixel types: samples, pixels and their consistency rules.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{RastileError, RastileResult};

/// The numeric type of a single pixel component.
///
/// The 1-, 2- and 4-bit widths are carried in 8-bit storage; values
/// must fit the declared width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SampleType {
    /// 1-bit sample (0 or 1), stored in a u8.
    OneBit = 0x91,
    /// 2-bit sample (0..=3), stored in a u8.
    TwoBit = 0x92,
    /// 4-bit sample (0..=15), stored in a u8.
    FourBit = 0x93,
    /// Signed 8-bit integer.
    Int8 = 0x94,
    /// Unsigned 8-bit integer.
    UInt8 = 0x95,
    /// Signed 16-bit integer.
    Int16 = 0x96,
    /// Unsigned 16-bit integer.
    UInt16 = 0x97,
    /// Signed 32-bit integer.
    Int32 = 0x98,
    /// Unsigned 32-bit integer.
    UInt32 = 0x99,
    /// 32-bit floating point.
    Float32 = 0x9a,
    /// 64-bit floating point.
    Float64 = 0x9b,
}

impl SampleType {
    /// Storage size in bytes of one sample of this type.
    pub fn size(&self) -> usize {
        match self {
            SampleType::OneBit
            | SampleType::TwoBit
            | SampleType::FourBit
            | SampleType::Int8
            | SampleType::UInt8 => 1,
            SampleType::Int16 | SampleType::UInt16 => 2,
            SampleType::Int32 | SampleType::UInt32 | SampleType::Float32 => 4,
            SampleType::Float64 => 8,
        }
    }

    /// Whether this type packs below one byte per sample on the wire.
    pub fn is_sub_byte(&self) -> bool {
        matches!(
            self,
            SampleType::OneBit | SampleType::TwoBit | SampleType::FourBit
        )
    }

    /// The largest value a sub-byte sample may carry, if sub-byte.
    pub(crate) fn sub_byte_max(&self) -> Option<u8> {
        match self {
            SampleType::OneBit => Some(1),
            SampleType::TwoBit => Some(3),
            SampleType::FourBit => Some(15),
            _ => None,
        }
    }

    /// The ASCII label persisted in `raster_coverages.sample_type`.
    pub fn label(&self) -> &'static str {
        match self {
            SampleType::OneBit => "1-BIT",
            SampleType::TwoBit => "2-BIT",
            SampleType::FourBit => "4-BIT",
            SampleType::Int8 => "INT8",
            SampleType::UInt8 => "UINT8",
            SampleType::Int16 => "INT16",
            SampleType::UInt16 => "UINT16",
            SampleType::Int32 => "INT32",
            SampleType::UInt32 => "UINT32",
            SampleType::Float32 => "FLOAT",
            SampleType::Float64 => "DOUBLE",
        }
    }

    /// Parse a coverage label, case-insensitively.
    pub fn from_label(label: &str) -> RastileResult<Self> {
        let all = [
            SampleType::OneBit,
            SampleType::TwoBit,
            SampleType::FourBit,
            SampleType::Int8,
            SampleType::UInt8,
            SampleType::Int16,
            SampleType::UInt16,
            SampleType::Int32,
            SampleType::UInt32,
            SampleType::Float32,
            SampleType::Float64,
        ];
        all.into_iter()
            .find(|s| s.label().eq_ignore_ascii_case(label))
            .ok_or_else(|| RastileError::invalid(format!("unknown sample type label {label:?}")))
    }
}

/// How the samples of a pixel are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PixelType {
    /// 1-bit black/white imagery (0 = white, 1 = black).
    Monochrome = 0x11,
    /// Palette indices resolved through an attached [`Palette`].
    ///
    /// [`Palette`]: crate::palette::Palette
    Palette = 0x12,
    /// Gray levels.
    Grayscale = 0x13,
    /// Three uint8 bands, red/green/blue.
    Rgb = 0x14,
    /// Two or more bands of identical integer type.
    MultiBand = 0x15,
    /// Single-band numeric grid (elevations, measurements).
    DataGrid = 0x16,
}

impl PixelType {
    /// The ASCII label persisted in `raster_coverages.pixel_type`.
    pub fn label(&self) -> &'static str {
        match self {
            PixelType::Monochrome => "MONOCHROME",
            PixelType::Palette => "PALETTE",
            PixelType::Grayscale => "GRAYSCALE",
            PixelType::Rgb => "RGB",
            PixelType::MultiBand => "MULTIBAND",
            PixelType::DataGrid => "DATAGRID",
        }
    }

    /// Parse a coverage label, case-insensitively.
    pub fn from_label(label: &str) -> RastileResult<Self> {
        let all = [
            PixelType::Monochrome,
            PixelType::Palette,
            PixelType::Grayscale,
            PixelType::Rgb,
            PixelType::MultiBand,
            PixelType::DataGrid,
        ];
        all.into_iter()
            .find(|p| p.label().eq_ignore_ascii_case(label))
            .ok_or_else(|| RastileError::invalid(format!("unknown pixel type label {label:?}")))
    }
}

/// Checks a (sample, pixel, bands) triple against the raster
/// self-consistency matrix.
pub(crate) fn raster_self_consistent(
    sample_type: SampleType,
    pixel_type: PixelType,
    bands: u8,
) -> bool {
    match pixel_type {
        PixelType::Monochrome => sample_type == SampleType::OneBit && bands == 1,
        PixelType::Palette | PixelType::Grayscale => {
            bands == 1
                && matches!(
                    sample_type,
                    SampleType::OneBit
                        | SampleType::TwoBit
                        | SampleType::FourBit
                        | SampleType::UInt8
                )
        }
        PixelType::Rgb => sample_type == SampleType::UInt8 && bands == 3,
        PixelType::MultiBand => {
            bands >= 2 && matches!(sample_type, SampleType::UInt8 | SampleType::UInt16)
        }
        PixelType::DataGrid => {
            bands == 1
                && matches!(
                    sample_type,
                    SampleType::Int8
                        | SampleType::UInt8
                        | SampleType::Int16
                        | SampleType::UInt16
                        | SampleType::Int32
                        | SampleType::UInt32
                        | SampleType::Float32
                        | SampleType::Float64
                )
        }
    }
}

/// A single numeric pixel component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// Unsigned 8-bit value, also the carrier for 1/2/4-bit widths.
    U8(u8),
    /// Signed 8-bit value.
    I8(i8),
    /// Unsigned 16-bit value.
    U16(u16),
    /// Signed 16-bit value.
    I16(i16),
    /// Unsigned 32-bit value.
    U32(u32),
    /// Signed 32-bit value.
    I32(i32),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
}

impl Sample {
    /// A zero sample of the given type.
    pub fn zero(sample_type: SampleType) -> Self {
        match sample_type {
            SampleType::OneBit | SampleType::TwoBit | SampleType::FourBit | SampleType::UInt8 => {
                Sample::U8(0)
            }
            SampleType::Int8 => Sample::I8(0),
            SampleType::UInt16 => Sample::U16(0),
            SampleType::Int16 => Sample::I16(0),
            SampleType::UInt32 => Sample::U32(0),
            SampleType::Int32 => Sample::I32(0),
            SampleType::Float32 => Sample::F32(0.0),
            SampleType::Float64 => Sample::F64(0.0),
        }
    }

    /// Whether this sample's representation matches the given type.
    pub fn matches(&self, sample_type: SampleType) -> bool {
        matches!(
            (self, sample_type),
            (
                Sample::U8(_),
                SampleType::OneBit | SampleType::TwoBit | SampleType::FourBit | SampleType::UInt8
            ) | (Sample::I8(_), SampleType::Int8)
                | (Sample::U16(_), SampleType::UInt16)
                | (Sample::I16(_), SampleType::Int16)
                | (Sample::U32(_), SampleType::UInt32)
                | (Sample::I32(_), SampleType::Int32)
                | (Sample::F32(_), SampleType::Float32)
                | (Sample::F64(_), SampleType::Float64)
        )
    }

    /// The sample value widened to `f64`.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Sample::U8(v) => v as f64,
            Sample::I8(v) => v as f64,
            Sample::U16(v) => v as f64,
            Sample::I16(v) => v as f64,
            Sample::U32(v) => v as f64,
            Sample::I32(v) => v as f64,
            Sample::F32(v) => v as f64,
            Sample::F64(v) => v,
        }
    }
}

/// A fixed-width tuple of samples of uniform type.
///
/// `(sample_type, pixel_type, bands)` always belongs to the raster
/// self-consistency matrix; construction enforces it.
#[derive(Debug, Clone, PartialEq)]
pub struct Pixel {
    sample_type: SampleType,
    pixel_type: PixelType,
    samples: Vec<Sample>,
    transparent: bool,
}

impl Pixel {
    /// Create a pixel of the given shape with all samples zeroed.
    pub fn new(
        sample_type: SampleType,
        pixel_type: PixelType,
        bands: u8,
    ) -> RastileResult<Self> {
        if !raster_self_consistent(sample_type, pixel_type, bands) {
            return Err(RastileError::invalid(format!(
                "inconsistent pixel: {} {} x{}",
                sample_type.label(),
                pixel_type.label(),
                bands
            )));
        }
        Ok(Self {
            sample_type,
            pixel_type,
            samples: vec![Sample::zero(sample_type); bands as usize],
            transparent: false,
        })
    }

    /// A 1-bit monochrome pixel (0 = white, 1 = black).
    pub fn monochrome(value: u8) -> RastileResult<Self> {
        let mut pixel = Self::new(SampleType::OneBit, PixelType::Monochrome, 1)?;
        pixel.set_sample(0, Sample::U8(value))?;
        Ok(pixel)
    }

    /// A uint8 grayscale pixel.
    pub fn grayscale(value: u8) -> Self {
        let mut pixel = Self::new(SampleType::UInt8, PixelType::Grayscale, 1)
            .expect("uint8 grayscale is always consistent");
        pixel.samples[0] = Sample::U8(value);
        pixel
    }

    /// A uint8 RGB pixel.
    pub fn rgb(red: u8, green: u8, blue: u8) -> Self {
        let mut pixel = Self::new(SampleType::UInt8, PixelType::Rgb, 3)
            .expect("uint8 rgb is always consistent");
        pixel.samples[0] = Sample::U8(red);
        pixel.samples[1] = Sample::U8(green);
        pixel.samples[2] = Sample::U8(blue);
        pixel
    }

    /// A palette-index pixel of the given sub-byte or uint8 width.
    pub fn palette(sample_type: SampleType, index: u8) -> RastileResult<Self> {
        let mut pixel = Self::new(sample_type, PixelType::Palette, 1)?;
        pixel.set_sample(0, Sample::U8(index))?;
        Ok(pixel)
    }

    /// The sample type shared by all bands.
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    /// The pixel interpretation.
    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    /// Number of bands.
    pub fn bands(&self) -> u8 {
        self.samples.len() as u8
    }

    /// Whether this pixel is flagged transparent.
    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    /// Set or clear the transparency flag.
    pub fn set_transparent(&mut self, transparent: bool) {
        self.transparent = transparent;
    }

    /// Read one band.
    pub fn sample(&self, band: u8) -> RastileResult<Sample> {
        self.samples
            .get(band as usize)
            .copied()
            .ok_or_else(|| RastileError::invalid(format!("band {band} out of range")))
    }

    /// All samples in band order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Write one band. The sample representation must match the
    /// pixel's declared sample type, and sub-byte values must fit the
    /// declared width.
    pub fn set_sample(&mut self, band: u8, sample: Sample) -> RastileResult<()> {
        if !sample.matches(self.sample_type) {
            return Err(RastileError::invalid(format!(
                "sample does not match declared type {}",
                self.sample_type.label()
            )));
        }
        if let (Sample::U8(v), Some(max)) = (sample, self.sample_type.sub_byte_max()) {
            if v > max {
                return Err(RastileError::invalid(format!(
                    "value {v} exceeds {} width",
                    self.sample_type.label()
                )));
            }
        }
        let slot = self
            .samples
            .get_mut(band as usize)
            .ok_or_else(|| RastileError::invalid(format!("band {band} out of range")))?;
        *slot = sample;
        Ok(())
    }

    /// Whether another pixel has the same shape (type triple).
    pub fn same_shape(&self, other: &Pixel) -> bool {
        self.sample_type == other.sample_type
            && self.pixel_type == other.pixel_type
            && self.samples.len() == other.samples.len()
    }
}
