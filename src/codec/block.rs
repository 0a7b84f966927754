//! Odd/Even block serialization.
//!
//! Every tile becomes one Odd block and, for split encodings at full
//! resolution, one Even companion. Both blocks are framed by sentinel
//! bytes and carry their own CRC32; the Even block echoes the Odd
//! block's CRC for linkage.

use bytes::Bytes;

use crate::codec::{backends, encode_self_consistent, markers, rle, subbyte, Compression};
use crate::error::{RastileError, RastileResult};
use crate::pixel::{PixelType, SampleType};
use crate::raster::{host_little_endian, Raster, SampleValue};

/// Fixed overhead of an Odd block around its payload and mask.
pub(crate) const ODD_BLOCK_OVERHEAD: usize = 40;
/// Fixed overhead of an Even block around its payload.
pub(crate) const EVEN_BLOCK_OVERHEAD: usize = 32;

/// The serialized form of one tile.
#[derive(Debug, Clone)]
pub struct EncodedTile {
    /// The Odd block: header, payload, mask and CRC.
    pub odd: Bytes,
    /// The Even companion, absent for full-image codecs, sub-byte
    /// solid blocks and single-row tiles.
    pub even: Option<Bytes>,
}

pub(crate) fn put_u16(buf: &mut Vec<u8>, value: u16, little: bool) {
    let raw = if little {
        value.to_le_bytes()
    } else {
        value.to_be_bytes()
    };
    buf.extend_from_slice(&raw);
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32, little: bool) {
    let raw = if little {
        value.to_le_bytes()
    } else {
        value.to_be_bytes()
    };
    buf.extend_from_slice(&raw);
}

pub(crate) fn get_u16(buf: &[u8], offset: usize, little: bool) -> u16 {
    let raw = buf[offset..offset + 2].try_into().unwrap();
    if little {
        u16::from_le_bytes(raw)
    } else {
        u16::from_be_bytes(raw)
    }
}

pub(crate) fn get_u32(buf: &[u8], offset: usize, little: bool) -> u32 {
    let raw = buf[offset..offset + 4].try_into().unwrap();
    if little {
        u32::from_le_bytes(raw)
    } else {
        u32::from_be_bytes(raw)
    }
}

/// Copy every `step`-th row starting at `start_row` into a fresh
/// buffer in the requested wire byte order.
fn copy_rows<T: SampleValue>(
    data: &[u8],
    width: usize,
    bands: usize,
    height: usize,
    start_row: usize,
    step: usize,
    little: bool,
) -> Vec<u8> {
    let row_values = width * bands;
    let row_bytes = row_values * T::BYTES;
    let rows: Vec<usize> = (start_row..height).step_by(step).collect();
    let mut out = Vec::with_capacity(rows.len() * row_bytes);
    let host_little = host_little_endian();
    if little == host_little {
        for row in rows {
            out.extend_from_slice(&data[row * row_bytes..(row + 1) * row_bytes]);
        }
    } else {
        let mut scratch = vec![0u8; row_bytes];
        for row in rows {
            let base = row * row_bytes;
            for i in 0..row_values {
                let value = T::read(data, base + i * T::BYTES, host_little);
                value.write(&mut scratch, i * T::BYTES, little);
            }
            out.extend_from_slice(&scratch);
        }
    }
    out
}

fn rows_to_wire(
    raster: &Raster,
    start_row: usize,
    step: usize,
    little: bool,
) -> Vec<u8> {
    let (width, height, bands) = (
        raster.width() as usize,
        raster.height() as usize,
        raster.bands() as usize,
    );
    let data = raster.data();
    match raster.sample_type() {
        SampleType::OneBit
        | SampleType::TwoBit
        | SampleType::FourBit
        | SampleType::UInt8 => copy_rows::<u8>(data, width, bands, height, start_row, step, little),
        SampleType::Int8 => copy_rows::<i8>(data, width, bands, height, start_row, step, little),
        SampleType::UInt16 => copy_rows::<u16>(data, width, bands, height, start_row, step, little),
        SampleType::Int16 => copy_rows::<i16>(data, width, bands, height, start_row, step, little),
        SampleType::UInt32 => copy_rows::<u32>(data, width, bands, height, start_row, step, little),
        SampleType::Int32 => copy_rows::<i32>(data, width, bands, height, start_row, step, little),
        SampleType::Float32 => {
            copy_rows::<f32>(data, width, bands, height, start_row, step, little)
        }
        SampleType::Float64 => {
            copy_rows::<f64>(data, width, bands, height, start_row, step, little)
        }
    }
}

/// One prepared payload: the bytes to frame plus its uncompressed
/// size. `compressed == uncompressed` signals a raw store.
struct Payload {
    data: Vec<u8>,
    uncompressed: usize,
}

/// Compress generic bytes, falling back to a raw store when the
/// compressor inflates the payload.
fn generic_compress(compression: Compression, raw: Vec<u8>) -> RastileResult<Payload> {
    let uncompressed = raw.len();
    let data = match compression {
        Compression::None => raw,
        Compression::Deflate => {
            let packed = backends::deflate_compress(&raw)?;
            if packed.len() < uncompressed {
                packed
            } else {
                raw
            }
        }
        Compression::Lzma => {
            let packed = backends::lzma_compress(&raw)?;
            if packed.len() < uncompressed {
                packed
            } else {
                raw
            }
        }
        other => {
            return Err(RastileError::invalid(format!(
                "{} is not a generic byte compressor",
                other.label()
            )))
        }
    };
    Ok(Payload { data, uncompressed })
}

/// Expand grayscale bytes to RGB triplets for codecs without a
/// grayscale layout.
fn gray_to_rgb(gray: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(gray.len() * 3);
    for &g in gray {
        rgb.extend_from_slice(&[g, g, g]);
    }
    rgb
}

/// Encode a raster into its Odd/Even block pair.
///
/// `little_endian` selects the wire byte order recorded in both block
/// headers. `quality` only affects the lossy codecs.
pub fn encode_tile(
    raster: &Raster,
    compression: Compression,
    quality: u8,
    little_endian: bool,
) -> RastileResult<EncodedTile> {
    if !encode_self_consistent(
        raster.sample_type(),
        raster.pixel_type(),
        raster.bands(),
        compression,
    ) {
        return Err(RastileError::unsupported(format!(
            "cannot encode {} {} x{} as {}",
            raster.sample_type().label(),
            raster.pixel_type().label(),
            raster.bands(),
            compression.label()
        )));
    }

    let width = raster.width() as usize;
    let height = raster.height() as usize;
    let sample_type = raster.sample_type();

    // The mask always travels RLE-encoded inside the Odd block.
    let (mask_rle, uncompressed_mask) = match raster.mask() {
        Some(mask) => (rle::encode_mask(width, height, mask), width * height),
        None => (Vec::new(), 0),
    };

    let mut row_stride_odd = 0u16;
    let mut odd_rows = height as u16;
    let mut even_payload: Option<Payload> = None;

    let odd_payload = match compression {
        Compression::None | Compression::Deflate | Compression::Lzma => {
            if sample_type.is_sub_byte() {
                // Solid Odd block of bit-packed rows.
                let packed = match sample_type {
                    SampleType::OneBit => subbyte::pack_1bit(width, height, raster.data()),
                    SampleType::TwoBit => subbyte::pack_2bit(width, height, raster.data()),
                    _ => subbyte::pack_4bit(width, height, raster.data()),
                };
                let bits = match sample_type {
                    SampleType::OneBit => 1,
                    SampleType::TwoBit => 2,
                    _ => 4,
                };
                row_stride_odd = subbyte::row_stride(width, bits) as u16;
                generic_compress(compression, packed)?
            } else {
                let odd = rows_to_wire(raster, 0, 2, little_endian);
                let even = rows_to_wire(raster, 1, 2, little_endian);
                row_stride_odd = (width * raster.bands() as usize * sample_type.size()) as u16;
                odd_rows = height.div_ceil(2) as u16;
                if !even.is_empty() {
                    even_payload = Some(generic_compress(compression, even)?);
                }
                generic_compress(compression, odd)?
            }
        }
        Compression::Png | Compression::Gif => {
            if sample_type.is_sub_byte() {
                // Whole image in one solid Odd block.
                let data = match compression {
                    Compression::Png => backends::png_encode(
                        raster.data(),
                        width as u16,
                        height as u16,
                        sample_type,
                        raster.pixel_type(),
                        raster.palette(),
                    )?,
                    _ => {
                        let palette = sub_byte_gif_palette(raster)?;
                        backends::gif_encode(raster.data(), width as u16, height as u16, &palette)?
                    }
                };
                Payload {
                    data,
                    uncompressed: width * height,
                }
            } else {
                let odd = rows_to_wire(raster, 0, 2, little_endian);
                let even = rows_to_wire(raster, 1, 2, little_endian);
                odd_rows = height.div_ceil(2) as u16;
                let even_rows = height / 2;
                let encode_rows = |rows_data: &[u8], rows: u16| -> RastileResult<Vec<u8>> {
                    match compression {
                        Compression::Png => backends::png_encode(
                            rows_data,
                            width as u16,
                            rows,
                            sample_type,
                            raster.pixel_type(),
                            raster.palette(),
                        ),
                        _ => {
                            let palette = sub_byte_gif_palette(raster)?;
                            backends::gif_encode(rows_data, width as u16, rows, &palette)
                        }
                    }
                };
                if even_rows > 0 {
                    even_payload = Some(Payload {
                        uncompressed: even.len(),
                        data: encode_rows(&even, even_rows as u16)?,
                    });
                }
                Payload {
                    uncompressed: odd.len(),
                    data: encode_rows(&odd, odd_rows)?,
                }
            }
        }
        Compression::Jpeg => {
            let channels = raster.bands();
            let data = backends::jpeg_encode(
                raster.data(),
                width as u16,
                height as u16,
                channels,
                quality,
            )?;
            Payload {
                data,
                uncompressed: width * height * channels as usize,
            }
        }
        Compression::LossyWebp | Compression::LosslessWebp => {
            let rgb;
            let pixels: &[u8] = if raster.pixel_type() == PixelType::Grayscale {
                rgb = gray_to_rgb(raster.data());
                &rgb
            } else {
                raster.data()
            };
            let data = backends::webp_encode(
                pixels,
                width as u16,
                height as u16,
                quality,
                compression == Compression::LosslessWebp,
            )?;
            Payload {
                data,
                uncompressed: width * height * raster.bands() as usize,
            }
        }
        Compression::CcittFax4 => Payload {
            data: backends::fax4_encode(raster.data(), width as u16, height as u16)?,
            uncompressed: width * height,
        },
    };

    let odd_block = build_odd_block(
        raster,
        compression,
        little_endian,
        row_stride_odd,
        odd_rows,
        &odd_payload,
        &mask_rle,
        uncompressed_mask,
    );
    let odd_crc = get_u32(
        &odd_block,
        odd_block.len() - 5,
        little_endian,
    );
    let even_block = even_payload.map(|payload| {
        build_even_block(
            raster,
            compression,
            little_endian,
            (height / 2) as u16,
            odd_crc,
            &payload,
        )
    });

    Ok(EncodedTile {
        odd: Bytes::from(odd_block),
        even: even_block.map(Bytes::from),
    })
}

/// The palette a GIF frame travels with: the raster's own palette,
/// or a gray ramp for grayscale and monochrome data.
fn sub_byte_gif_palette(raster: &Raster) -> RastileResult<crate::palette::Palette> {
    match raster.palette() {
        Some(palette) => Ok(palette.clone()),
        None => match raster.pixel_type() {
            PixelType::Monochrome => Ok(crate::palette::Palette::monochrome()),
            _ => crate::palette::Palette::gray_ramp(raster.sample_type()),
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn build_odd_block(
    raster: &Raster,
    compression: Compression,
    little: bool,
    row_stride_odd: u16,
    odd_rows: u16,
    payload: &Payload,
    mask_rle: &[u8],
    uncompressed_mask: usize,
) -> Vec<u8> {
    let mut block =
        Vec::with_capacity(ODD_BLOCK_OVERHEAD + payload.data.len() + mask_rle.len());
    block.push(0x00);
    block.push(markers::ODD_BLOCK_START);
    block.push(if little {
        markers::LITTLE_ENDIAN
    } else {
        markers::BIG_ENDIAN
    });
    block.push(compression.into());
    block.push(raster.sample_type().into());
    block.push(raster.pixel_type().into());
    block.push(raster.bands());
    put_u16(&mut block, raster.width(), little);
    put_u16(&mut block, raster.height(), little);
    put_u16(&mut block, row_stride_odd, little);
    put_u16(&mut block, odd_rows, little);
    put_u32(&mut block, payload.uncompressed as u32, little);
    put_u32(&mut block, payload.data.len() as u32, little);
    put_u32(&mut block, uncompressed_mask as u32, little);
    put_u32(&mut block, mask_rle.len() as u32, little);
    block.push(markers::DATA_START);
    block.extend_from_slice(&payload.data);
    block.push(markers::DATA_END);
    block.push(markers::MASK_START);
    block.extend_from_slice(mask_rle);
    block.push(markers::MASK_END);
    let crc = crc32fast::hash(&block);
    put_u32(&mut block, crc, little);
    block.push(markers::ODD_BLOCK_END);
    block
}

fn build_even_block(
    raster: &Raster,
    compression: Compression,
    little: bool,
    even_rows: u16,
    odd_crc: u32,
    payload: &Payload,
) -> Vec<u8> {
    let mut block = Vec::with_capacity(EVEN_BLOCK_OVERHEAD + payload.data.len());
    block.push(0x00);
    block.push(markers::EVEN_BLOCK_START);
    block.push(if little {
        markers::LITTLE_ENDIAN
    } else {
        markers::BIG_ENDIAN
    });
    block.push(compression.into());
    block.push(raster.sample_type().into());
    block.push(raster.pixel_type().into());
    block.push(raster.bands());
    put_u16(&mut block, raster.width(), little);
    put_u16(&mut block, raster.height(), little);
    put_u16(&mut block, even_rows, little);
    put_u32(&mut block, odd_crc, little);
    put_u32(&mut block, payload.uncompressed as u32, little);
    put_u32(&mut block, payload.data.len() as u32, little);
    block.push(markers::DATA_START);
    block.extend_from_slice(&payload.data);
    block.push(markers::DATA_END);
    let crc = crc32fast::hash(&block);
    put_u32(&mut block, crc, little);
    block.push(markers::EVEN_BLOCK_END);
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_raster(width: u16, height: u16) -> Raster {
        let data: Vec<u8> = (0..width as usize * height as usize)
            .map(|i| (i % 251) as u8)
            .collect();
        Raster::new(
            width,
            height,
            SampleType::UInt8,
            PixelType::Grayscale,
            1,
            data,
            None,
        )
        .unwrap()
    }

    #[test]
    fn odd_block_framing() {
        let raster = gray_raster(16, 8);
        let tile = encode_tile(&raster, Compression::None, 100, true).unwrap();
        let odd = &tile.odd;
        assert_eq!(odd[0], 0x00);
        assert_eq!(odd[1], markers::ODD_BLOCK_START);
        assert_eq!(odd[2], markers::LITTLE_ENDIAN);
        assert_eq!(odd[odd.len() - 1], markers::ODD_BLOCK_END);
        // 4 odd rows of 16 bytes, no mask.
        assert_eq!(odd.len(), ODD_BLOCK_OVERHEAD + 4 * 16);
        assert_eq!(get_u16(odd, 7, true), 16);
        assert_eq!(get_u16(odd, 9, true), 8);
        assert_eq!(get_u16(odd, 13, true), 4);

        let even = tile.even.as_ref().unwrap();
        assert_eq!(even[1], markers::EVEN_BLOCK_START);
        assert_eq!(even[even.len() - 1], markers::EVEN_BLOCK_END);
        assert_eq!(even.len(), EVEN_BLOCK_OVERHEAD + 4 * 16);
        // Even header echoes the Odd CRC.
        let odd_crc = get_u32(odd, odd.len() - 5, true);
        assert_eq!(get_u32(even, 13, true), odd_crc);
    }

    #[test]
    fn single_row_has_no_even_block() {
        let raster = gray_raster(16, 1);
        let tile = encode_tile(&raster, Compression::None, 100, true).unwrap();
        assert!(tile.even.is_none());
    }

    #[test]
    fn full_image_codecs_skip_even_block() {
        let raster = gray_raster(32, 32);
        for compression in [Compression::Jpeg, Compression::LossyWebp] {
            let tile = encode_tile(&raster, compression, 80, true).unwrap();
            assert!(tile.even.is_none(), "{compression:?}");
        }
    }

    #[test]
    fn matrix_violation_rejected() {
        let raster = gray_raster(8, 8);
        assert!(matches!(
            encode_tile(&raster, Compression::CcittFax4, 100, true),
            Err(RastileError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn incompressible_payload_stored_raw() {
        // A pseudo-random ramp defeats deflate on a tiny tile, so the
        // header must record compressed == uncompressed.
        let data: Vec<u8> = (0..64u32).map(|i| (i.wrapping_mul(197) % 256) as u8).collect();
        let raster = Raster::new(
            8,
            8,
            SampleType::UInt8,
            PixelType::DataGrid,
            1,
            data,
            None,
        )
        .unwrap();
        let tile = encode_tile(&raster, Compression::Deflate, 100, true).unwrap();
        let uncompressed = get_u32(&tile.odd, 15, true);
        let compressed = get_u32(&tile.odd, 19, true);
        assert_eq!(uncompressed, compressed);
    }

    #[test]
    fn mask_sizes_recorded() {
        let mut mask = vec![1u8; 16 * 8];
        mask[0] = 0;
        let raster = gray_raster(16, 8).with_mask(mask).unwrap();
        let tile = encode_tile(&raster, Compression::None, 100, true).unwrap();
        assert_eq!(get_u32(&tile.odd, 23, true), 16 * 8);
        assert!(get_u32(&tile.odd, 27, true) > 0);
    }

    #[test]
    fn big_endian_header() {
        let raster = gray_raster(16, 4);
        let tile = encode_tile(&raster, Compression::None, 100, false).unwrap();
        assert_eq!(tile.odd[2], markers::BIG_ENDIAN);
        assert_eq!(get_u16(&tile.odd, 7, false), 16);
    }
}
