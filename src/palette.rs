//! Palettes: ordered RGBA tables with derived effective types.

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::markers;
use crate::error::{RastileError, RastileResult};
use crate::pixel::{PixelType, SampleType};

/// The canonical 4-level gray ramp.
const GRAY4: [u8; 4] = [0, 86, 170, 255];
/// The canonical 16-level gray ramp.
const GRAY16: [u8; 16] = [
    0, 17, 34, 51, 68, 85, 102, 119, 137, 154, 171, 188, 205, 222, 239, 255,
];

/// One palette slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteEntry {
    /// Red channel.
    pub red: u8,
    /// Green channel.
    pub green: u8,
    /// Blue channel.
    pub blue: u8,
    /// Alpha channel.
    pub alpha: u8,
}

impl PaletteEntry {
    /// An opaque RGB entry.
    pub fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha: 255,
        }
    }

    /// Parse a `#RRGGBB` hex triplet into an opaque entry.
    pub fn parse_hex(hex: &str) -> RastileResult<Self> {
        let digits = hex
            .strip_prefix('#')
            .ok_or_else(|| RastileError::invalid(format!("hex color {hex:?} missing '#'")))?;
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RastileError::invalid(format!(
                "hex color {hex:?} is not #RRGGBB"
            )));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| RastileError::invalid(format!("hex color {hex:?} is not #RRGGBB")))
        };
        Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

/// An ordered table of up to 256 RGBA entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<PaletteEntry>,
}

impl Palette {
    /// Create a palette with `len` opaque black entries.
    pub fn new(len: usize) -> RastileResult<Self> {
        if len == 0 || len > 256 {
            return Err(RastileError::invalid(format!(
                "palette length {len} outside 1..=256"
            )));
        }
        Ok(Self {
            entries: vec![PaletteEntry::rgb(0, 0, 0); len],
        })
    }

    /// Build a palette from explicit entries.
    pub fn from_entries(entries: Vec<PaletteEntry>) -> RastileResult<Self> {
        if entries.is_empty() || entries.len() > 256 {
            return Err(RastileError::invalid(format!(
                "palette length {} outside 1..=256",
                entries.len()
            )));
        }
        Ok(Self { entries })
    }

    /// The canonical black-on-white monochrome pair.
    pub fn monochrome() -> Self {
        Self {
            entries: vec![PaletteEntry::rgb(255, 255, 255), PaletteEntry::rgb(0, 0, 0)],
        }
    }

    /// A canonical gray ramp of 2^bits levels for the given sub-byte
    /// or uint8 sample type.
    pub fn gray_ramp(sample_type: SampleType) -> RastileResult<Self> {
        let entries: Vec<PaletteEntry> = match sample_type {
            SampleType::OneBit => vec![0u8, 255]
                .into_iter()
                .map(|g| PaletteEntry::rgb(g, g, g))
                .collect(),
            SampleType::TwoBit => GRAY4.iter().map(|&g| PaletteEntry::rgb(g, g, g)).collect(),
            SampleType::FourBit => GRAY16.iter().map(|&g| PaletteEntry::rgb(g, g, g)).collect(),
            SampleType::UInt8 => (0..=255u8).map(|g| PaletteEntry::rgb(g, g, g)).collect(),
            other => {
                return Err(RastileError::invalid(format!(
                    "no gray ramp for sample type {}",
                    other.label()
                )))
            }
        };
        Ok(Self { entries })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; palettes have at least one entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read one entry.
    pub fn entry(&self, index: u8) -> RastileResult<PaletteEntry> {
        self.entries
            .get(index as usize)
            .copied()
            .ok_or_else(|| RastileError::invalid(format!("palette index {index} out of range")))
    }

    /// All entries in order.
    pub fn entries(&self) -> &[PaletteEntry] {
        &self.entries
    }

    /// Replace one entry.
    pub fn set_entry(&mut self, index: u8, entry: PaletteEntry) -> RastileResult<()> {
        let slot = self
            .entries
            .get_mut(index as usize)
            .ok_or_else(|| RastileError::invalid(format!("palette index {index} out of range")))?;
        *slot = entry;
        Ok(())
    }

    /// Find the index of an exact RGBA match.
    pub fn find(&self, entry: PaletteEntry) -> Option<u8> {
        self.entries.iter().position(|e| *e == entry).map(|i| i as u8)
    }

    /// Derive the effective (sample, pixel) type of this palette.
    ///
    /// The sample type follows the number of distinct colors; the
    /// pixel type is `Monochrome` for the canonical white/black pair,
    /// `Grayscale` for the canonical 4/16/256-level ramps, else
    /// `Palette`.
    pub fn effective_type(&self) -> (SampleType, PixelType) {
        let mut distinct: Vec<PaletteEntry> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !distinct.contains(entry) {
                distinct.push(*entry);
            }
        }
        let sample_type = match distinct.len() {
            0..=2 => SampleType::OneBit,
            3..=4 => SampleType::TwoBit,
            5..=16 => SampleType::FourBit,
            _ => SampleType::UInt8,
        };
        let pixel_type = if is_monochrome(&distinct) {
            PixelType::Monochrome
        } else if is_gray_ramp(&distinct) {
            PixelType::Grayscale
        } else {
            PixelType::Palette
        };
        (sample_type, pixel_type)
    }

    /// Serialize to the DBMS blob form (CRC-framed, little-endian).
    pub fn serialize(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(12 + self.entries.len() * 4);
        blob.push(0x00);
        blob.push(markers::DATA_START);
        blob.push(markers::LITTLE_ENDIAN);
        let mut n = [0u8; 2];
        LittleEndian::write_u16(&mut n, self.entries.len() as u16);
        blob.extend_from_slice(&n);
        blob.push(markers::PALETTE_START);
        for entry in &self.entries {
            blob.extend_from_slice(&[entry.red, entry.green, entry.blue, entry.alpha]);
        }
        blob.push(markers::PALETTE_END);
        let crc = crc32fast::hash(&blob);
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, crc);
        blob.extend_from_slice(&word);
        blob.push(markers::DATA_END);
        blob
    }

    /// Deserialize from the DBMS blob form, validating framing and CRC.
    pub fn deserialize(blob: &[u8]) -> RastileResult<Self> {
        if blob.len() < 12 {
            return Err(RastileError::corrupt("palette blob too short"));
        }
        if blob[0] != 0x00 || blob[1] != markers::DATA_START {
            return Err(RastileError::corrupt("palette blob start signature"));
        }
        let little = match blob[2] {
            markers::LITTLE_ENDIAN => true,
            markers::BIG_ENDIAN => false,
            _ => return Err(RastileError::corrupt("palette blob endian marker")),
        };
        let n_entries = if little {
            LittleEndian::read_u16(&blob[3..5])
        } else {
            byteorder::BigEndian::read_u16(&blob[3..5])
        } as usize;
        if blob.len() != 12 + n_entries * 4 {
            return Err(RastileError::corrupt("palette blob size mismatch"));
        }
        if blob[5] != markers::PALETTE_START {
            return Err(RastileError::corrupt("palette start marker"));
        }
        let mut entries = Vec::with_capacity(n_entries);
        let mut offset = 6;
        for _ in 0..n_entries {
            entries.push(PaletteEntry {
                red: blob[offset],
                green: blob[offset + 1],
                blue: blob[offset + 2],
                alpha: blob[offset + 3],
            });
            offset += 4;
        }
        if blob[offset] != markers::PALETTE_END {
            return Err(RastileError::corrupt("palette end marker"));
        }
        offset += 1;
        let crc = crc32fast::hash(&blob[..offset]);
        let stored = if little {
            LittleEndian::read_u32(&blob[offset..offset + 4])
        } else {
            byteorder::BigEndian::read_u32(&blob[offset..offset + 4])
        };
        if crc != stored {
            return Err(RastileError::corrupt("palette CRC mismatch"));
        }
        if blob[offset + 4] != markers::DATA_END {
            return Err(RastileError::corrupt("palette end signature"));
        }
        Self::from_entries(entries)
    }

    /// The palette flattened to RGB triplets, as image encoders want it.
    pub(crate) fn flat_rgb(&self) -> Vec<u8> {
        let mut flat = Vec::with_capacity(self.entries.len() * 3);
        for entry in &self.entries {
            flat.extend_from_slice(&[entry.red, entry.green, entry.blue]);
        }
        flat
    }
}

fn is_monochrome(distinct: &[PaletteEntry]) -> bool {
    distinct.len() == 2
        && distinct[0] == PaletteEntry::rgb(255, 255, 255)
        && distinct[1] == PaletteEntry::rgb(0, 0, 0)
}

fn is_gray_ramp(distinct: &[PaletteEntry]) -> bool {
    let gray = |entries: &[PaletteEntry], ramp: &[u8]| {
        entries.len() == ramp.len()
            && entries
                .iter()
                .zip(ramp)
                .all(|(e, &g)| e.red == g && e.green == g && e.blue == g)
    };
    match distinct.len() {
        4 => gray(distinct, &GRAY4),
        16 => gray(distinct, &GRAY16),
        256 => distinct
            .iter()
            .enumerate()
            .all(|(i, e)| e.red == i as u8 && e.green == i as u8 && e.blue == i as u8),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parsing() {
        let entry = PaletteEntry::parse_hex("#1a2B3c").unwrap();
        assert_eq!(entry, PaletteEntry::rgb(0x1a, 0x2b, 0x3c));
        assert!(PaletteEntry::parse_hex("1a2b3c").is_err());
        assert!(PaletteEntry::parse_hex("#1a2b3").is_err());
        assert!(PaletteEntry::parse_hex("#1a2b3g").is_err());
    }

    #[test]
    fn monochrome_detection() {
        let (sample, pixel) = Palette::monochrome().effective_type();
        assert_eq!(sample, SampleType::OneBit);
        assert_eq!(pixel, PixelType::Monochrome);

        // Reversed pair is a plain palette, not monochrome.
        let reversed = Palette::from_entries(vec![
            PaletteEntry::rgb(0, 0, 0),
            PaletteEntry::rgb(255, 255, 255),
        ])
        .unwrap();
        assert_eq!(reversed.effective_type().1, PixelType::Palette);
    }

    #[test]
    fn gray_ramp_detection() {
        for sample in [SampleType::TwoBit, SampleType::FourBit, SampleType::UInt8] {
            let ramp = Palette::gray_ramp(sample).unwrap();
            let (effective_sample, effective_pixel) = ramp.effective_type();
            assert_eq!(effective_sample, sample);
            assert_eq!(effective_pixel, PixelType::Grayscale);
        }
    }

    #[test]
    fn distinct_color_count_drives_sample_type() {
        let mut entries = Vec::new();
        for i in 0..10u8 {
            entries.push(PaletteEntry::rgb(i, 0, 0));
        }
        // Duplicates do not widen the effective type.
        entries.push(PaletteEntry::rgb(0, 0, 0));
        let palette = Palette::from_entries(entries).unwrap();
        assert_eq!(palette.effective_type().0, SampleType::FourBit);
    }

    #[test]
    fn serialize_round_trip() {
        let mut palette = Palette::new(5).unwrap();
        palette
            .set_entry(3, PaletteEntry::rgb(10, 20, 30))
            .unwrap();
        let blob = palette.serialize();
        let back = Palette::deserialize(&blob).unwrap();
        assert_eq!(back, palette);
    }

    #[test]
    fn corrupted_blob_rejected() {
        let palette = Palette::new(3).unwrap();
        let mut blob = palette.serialize();
        blob[7] ^= 0x01;
        assert!(matches!(
            Palette::deserialize(&blob),
            Err(RastileError::CorruptBlock(_))
        ));
    }

    #[test]
    fn find_exact_color() {
        let mut palette = Palette::new(4).unwrap();
        palette.set_entry(2, PaletteEntry::rgb(7, 8, 9)).unwrap();
        assert_eq!(palette.find(PaletteEntry::rgb(7, 8, 9)), Some(2));
        assert_eq!(palette.find(PaletteEntry::rgb(1, 1, 1)), None);
    }
}
