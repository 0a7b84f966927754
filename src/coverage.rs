//! Coverage descriptors: the immutable definition of a persisted
//! pyramid.

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::{encode_self_consistent, markers, Compression};
use crate::error::{RastileError, RastileResult};
use crate::palette::Palette;
use crate::pixel::{Pixel, PixelType, Sample, SampleType};

/// Tile sides must lie in this range and divide by 16.
const TILE_MIN: u16 = 256;
const TILE_MAX: u16 = 1024;

/// Immutable descriptor for a persisted pyramid.
///
/// Levels 1:2, 1:4, 1:8 inherit the same descriptor with
/// proportionally larger resolutions.
#[derive(Debug, Clone)]
pub struct Coverage {
    name: String,
    sample_type: SampleType,
    pixel_type: PixelType,
    bands: u8,
    compression: Compression,
    quality: u8,
    tile_width: u16,
    tile_height: u16,
    srid: i32,
    x_resolution: f64,
    y_resolution: f64,
    no_data: Option<Pixel>,
    palette: Option<Palette>,
}

impl Coverage {
    /// Create a coverage descriptor, validating the encode
    /// self-consistency matrix, tile geometry and quality range.
    /// Paletted coverages must carry their palette.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        sample_type: SampleType,
        pixel_type: PixelType,
        bands: u8,
        compression: Compression,
        quality: u8,
        tile_width: u16,
        tile_height: u16,
        srid: i32,
        x_resolution: f64,
        y_resolution: f64,
        no_data: Option<Pixel>,
    ) -> RastileResult<Self> {
        Self::with_palette(
            name,
            sample_type,
            pixel_type,
            bands,
            compression,
            quality,
            tile_width,
            tile_height,
            srid,
            x_resolution,
            y_resolution,
            no_data,
            None,
        )
    }

    /// [`Coverage::new`] with an explicit palette for paletted
    /// coverages.
    #[allow(clippy::too_many_arguments)]
    pub fn with_palette(
        name: impl Into<String>,
        sample_type: SampleType,
        pixel_type: PixelType,
        bands: u8,
        compression: Compression,
        quality: u8,
        tile_width: u16,
        tile_height: u16,
        srid: i32,
        x_resolution: f64,
        y_resolution: f64,
        no_data: Option<Pixel>,
        palette: Option<Palette>,
    ) -> RastileResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(RastileError::invalid("coverage name must not be empty"));
        }
        if !encode_self_consistent(sample_type, pixel_type, bands, compression) {
            return Err(RastileError::unsupported(format!(
                "cannot encode {} {} x{} as {}",
                sample_type.label(),
                pixel_type.label(),
                bands,
                compression.label()
            )));
        }
        if quality > 100 {
            return Err(RastileError::invalid(format!(
                "quality {quality} outside 0..=100"
            )));
        }
        for (side, label) in [(tile_width, "width"), (tile_height, "height")] {
            if !(TILE_MIN..=TILE_MAX).contains(&side) || side % 16 != 0 {
                return Err(RastileError::invalid(format!(
                    "tile {label} {side} must be in {TILE_MIN}..={TILE_MAX} and divisible by 16"
                )));
            }
        }
        if x_resolution <= 0.0 || y_resolution <= 0.0 {
            return Err(RastileError::invalid("resolutions must be positive"));
        }
        if let Some(pixel) = &no_data {
            if pixel.sample_type() != sample_type
                || pixel.pixel_type() != pixel_type
                || pixel.bands() != bands
            {
                return Err(RastileError::invalid(
                    "NoData pixel does not match the coverage shape",
                ));
            }
        }
        match (pixel_type, &palette) {
            (PixelType::Palette, None) => {
                return Err(RastileError::invalid(
                    "palette coverage requires a palette",
                ))
            }
            (PixelType::Palette, Some(_)) | (_, None) => {}
            (_, Some(_)) => {
                return Err(RastileError::invalid(
                    "palette supplied for a non-palette coverage",
                ))
            }
        }
        Ok(Self {
            name,
            sample_type,
            pixel_type,
            bands,
            compression,
            quality,
            tile_width,
            tile_height,
            srid,
            x_resolution,
            y_resolution,
            no_data,
            palette,
        })
    }

    /// The coverage name, also the prefix of its DBMS tables.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sample type of every band.
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    /// The pixel interpretation.
    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    /// Number of bands.
    pub fn bands(&self) -> u8 {
        self.bands
    }

    /// The compression applied to tile payloads.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Lossy-codec quality in 0..=100.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Tile width in pixels.
    pub fn tile_width(&self) -> u16 {
        self.tile_width
    }

    /// Tile height in pixels.
    pub fn tile_height(&self) -> u16 {
        self.tile_height
    }

    /// Spatial reference identifier.
    pub fn srid(&self) -> i32 {
        self.srid
    }

    /// Horizontal resolution at pyramid level 0.
    pub fn x_resolution(&self) -> f64 {
        self.x_resolution
    }

    /// Vertical resolution at pyramid level 0.
    pub fn y_resolution(&self) -> f64 {
        self.y_resolution
    }

    /// The NoData pixel, if any.
    pub fn no_data(&self) -> Option<&Pixel> {
        self.no_data.as_ref()
    }

    /// The palette of a paletted coverage.
    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_ref()
    }

    /// Resolutions at the given pyramid level (each level doubles the
    /// pixel size).
    pub fn level_resolution(&self, level: u32) -> (f64, f64) {
        let factor = (1u64 << level.min(52)) as f64;
        (self.x_resolution * factor, self.y_resolution * factor)
    }
}

/// Serialize a NoData pixel to its DBMS blob form.
///
/// Every sample travels as a little-endian f64; all supported integer
/// sample types are exactly representable.
pub(crate) fn serialize_no_data(pixel: &Pixel) -> Vec<u8> {
    let mut blob = Vec::with_capacity(11 + pixel.bands() as usize * 10);
    blob.push(0x00);
    blob.push(markers::NO_DATA_START);
    blob.push(markers::LITTLE_ENDIAN);
    blob.push(pixel.sample_type().into());
    blob.push(pixel.pixel_type().into());
    blob.push(pixel.bands());
    for sample in pixel.samples() {
        blob.push(markers::SAMPLE_START);
        let mut word = [0u8; 8];
        LittleEndian::write_f64(&mut word, sample.as_f64());
        blob.extend_from_slice(&word);
        blob.push(markers::SAMPLE_END);
    }
    let crc = crc32fast::hash(&blob);
    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, crc);
    blob.extend_from_slice(&word);
    blob.push(markers::NO_DATA_END);
    blob
}

/// Deserialize a NoData pixel from its DBMS blob form.
pub(crate) fn deserialize_no_data(blob: &[u8]) -> RastileResult<Pixel> {
    if blob.len() < 11 {
        return Err(RastileError::corrupt("NoData blob too short"));
    }
    if blob[0] != 0x00 || blob[1] != markers::NO_DATA_START {
        return Err(RastileError::corrupt("NoData blob start signature"));
    }
    if blob[2] != markers::LITTLE_ENDIAN {
        return Err(RastileError::corrupt("NoData blob endian marker"));
    }
    let sample_type = SampleType::try_from(blob[3])
        .map_err(|_| RastileError::corrupt("NoData blob sample type"))?;
    let pixel_type =
        PixelType::try_from(blob[4]).map_err(|_| RastileError::corrupt("NoData blob pixel type"))?;
    let bands = blob[5];
    let expected = 11 + bands as usize * 10;
    if blob.len() != expected {
        return Err(RastileError::corrupt("NoData blob size mismatch"));
    }
    let crc_offset = expected - 5;
    let crc = crc32fast::hash(&blob[..crc_offset]);
    if crc != LittleEndian::read_u32(&blob[crc_offset..crc_offset + 4]) {
        return Err(RastileError::corrupt("NoData blob CRC mismatch"));
    }
    if blob[expected - 1] != markers::NO_DATA_END {
        return Err(RastileError::corrupt("NoData blob end signature"));
    }
    let mut pixel = Pixel::new(sample_type, pixel_type, bands)?;
    let mut offset = 6;
    for band in 0..bands {
        if blob[offset] != markers::SAMPLE_START || blob[offset + 9] != markers::SAMPLE_END {
            return Err(RastileError::corrupt("NoData blob sample framing"));
        }
        let value = LittleEndian::read_f64(&blob[offset + 1..offset + 9]);
        pixel.set_sample(band, sample_from_f64(sample_type, value)?)?;
        offset += 10;
    }
    Ok(pixel)
}

fn sample_from_f64(sample_type: SampleType, value: f64) -> RastileResult<Sample> {
    let out_of_range =
        || RastileError::corrupt(format!("NoData value {value} out of range for sample type"));
    Ok(match sample_type {
        SampleType::OneBit | SampleType::TwoBit | SampleType::FourBit | SampleType::UInt8 => {
            if !(0.0..=255.0).contains(&value) {
                return Err(out_of_range());
            }
            Sample::U8(value as u8)
        }
        SampleType::Int8 => {
            if !(-128.0..=127.0).contains(&value) {
                return Err(out_of_range());
            }
            Sample::I8(value as i8)
        }
        SampleType::UInt16 => {
            if !(0.0..=65535.0).contains(&value) {
                return Err(out_of_range());
            }
            Sample::U16(value as u16)
        }
        SampleType::Int16 => {
            if !(-32768.0..=32767.0).contains(&value) {
                return Err(out_of_range());
            }
            Sample::I16(value as i16)
        }
        SampleType::UInt32 => {
            if !(0.0..=u32::MAX as f64).contains(&value) {
                return Err(out_of_range());
            }
            Sample::U32(value as u32)
        }
        SampleType::Int32 => {
            if !(i32::MIN as f64..=i32::MAX as f64).contains(&value) {
                return Err(out_of_range());
            }
            Sample::I32(value as i32)
        }
        SampleType::Float32 => Sample::F32(value as f32),
        SampleType::Float64 => Sample::F64(value),
    })
}
