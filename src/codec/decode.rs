//! Scale-aware tile decoding: validated block headers, payload
//! decompression and raster reconstruction at 1:1, 1:2, 1:4 or 1:8.

use crate::codec::block::{get_u16, get_u32};
use crate::codec::{backends, markers, rle, subbyte, Compression, Scale};
use crate::error::{RastileError, RastileResult};
use crate::palette::Palette;
use crate::pixel::{PixelType, SampleType};
use crate::raster::{buffer_size, host_little_endian, Raster, SampleValue};

/// A validated Odd block header.
#[derive(Debug, Clone, Copy)]
struct OddHeader {
    little: bool,
    compression: Compression,
    sample_type: SampleType,
    pixel_type: PixelType,
    bands: u8,
    width: u16,
    height: u16,
    row_stride_odd: u16,
    odd_rows: u16,
    uncompressed: usize,
    compressed: usize,
    uncompressed_mask: usize,
    compressed_mask: usize,
    crc: u32,
}

impl OddHeader {
    fn payload<'a>(&self, blob: &'a [u8]) -> &'a [u8] {
        &blob[32..32 + self.compressed]
    }

    fn mask<'a>(&self, blob: &'a [u8]) -> Option<&'a [u8]> {
        if self.uncompressed_mask == 0 {
            return None;
        }
        let start = 34 + self.compressed;
        Some(&blob[start..start + self.compressed_mask])
    }
}

/// A validated Even block header.
#[derive(Debug, Clone, Copy)]
struct EvenHeader {
    even_rows: u16,
    uncompressed: usize,
    compressed: usize,
}

impl EvenHeader {
    fn payload<'a>(&self, blob: &'a [u8]) -> &'a [u8] {
        &blob[26..26 + self.compressed]
    }
}

fn check_blob_odd(blob: &[u8]) -> RastileResult<OddHeader> {
    let corrupt = |msg: &str| RastileError::corrupt(format!("odd block: {msg}"));
    if blob.len() < 40 {
        return Err(corrupt("too short"));
    }
    if blob[0] != 0x00 || blob[1] != markers::ODD_BLOCK_START {
        return Err(corrupt("start sentinel"));
    }
    let little = match blob[2] {
        markers::LITTLE_ENDIAN => true,
        markers::BIG_ENDIAN => false,
        _ => return Err(corrupt("endian marker")),
    };
    let compression =
        Compression::try_from(blob[3]).map_err(|_| corrupt("compression code"))?;
    let sample_type = SampleType::try_from(blob[4]).map_err(|_| corrupt("sample type code"))?;
    let pixel_type = PixelType::try_from(blob[5]).map_err(|_| corrupt("pixel type code"))?;
    let bands = blob[6];
    if bands == 0 {
        return Err(corrupt("zero bands"));
    }
    let width = get_u16(blob, 7, little);
    let height = get_u16(blob, 9, little);
    if width == 0 || height == 0 {
        return Err(corrupt("zero dimension"));
    }
    let row_stride_odd = get_u16(blob, 11, little);
    let odd_rows = get_u16(blob, 13, little);
    let uncompressed = get_u32(blob, 15, little) as usize;
    let compressed = get_u32(blob, 19, little) as usize;
    let uncompressed_mask = get_u32(blob, 23, little) as usize;
    let compressed_mask = get_u32(blob, 27, little) as usize;
    if blob.len() != 40 + compressed + compressed_mask {
        return Err(corrupt("size mismatch"));
    }
    if blob[31] != markers::DATA_START {
        return Err(corrupt("data start marker"));
    }
    if blob[32 + compressed] != markers::DATA_END {
        return Err(corrupt("data end marker"));
    }
    if blob[33 + compressed] != markers::MASK_START {
        return Err(corrupt("mask start marker"));
    }
    if blob[34 + compressed + compressed_mask] != markers::MASK_END {
        return Err(corrupt("mask end marker"));
    }
    let crc_offset = 35 + compressed + compressed_mask;
    let crc = crc32fast::hash(&blob[..crc_offset]);
    let stored = get_u32(blob, crc_offset, little);
    if crc != stored {
        return Err(corrupt("CRC mismatch"));
    }
    if blob[crc_offset + 4] != markers::ODD_BLOCK_END {
        return Err(corrupt("end sentinel"));
    }
    Ok(OddHeader {
        little,
        compression,
        sample_type,
        pixel_type,
        bands,
        width,
        height,
        row_stride_odd,
        odd_rows,
        uncompressed,
        compressed,
        uncompressed_mask,
        compressed_mask,
        crc,
    })
}

fn check_blob_even(blob: &[u8], odd: &OddHeader) -> RastileResult<EvenHeader> {
    let corrupt = |msg: &str| RastileError::corrupt(format!("even block: {msg}"));
    if blob.len() < 32 {
        return Err(corrupt("too short"));
    }
    if blob[0] != 0x00 || blob[1] != markers::EVEN_BLOCK_START {
        return Err(corrupt("start sentinel"));
    }
    let little = match blob[2] {
        markers::LITTLE_ENDIAN => true,
        markers::BIG_ENDIAN => false,
        _ => return Err(corrupt("endian marker")),
    };
    if little != odd.little {
        return Err(corrupt("endian differs from odd block"));
    }
    if blob[3] != u8::from(odd.compression)
        || blob[4] != u8::from(odd.sample_type)
        || blob[5] != u8::from(odd.pixel_type)
        || blob[6] != odd.bands
    {
        return Err(corrupt("header does not echo odd block"));
    }
    if get_u16(blob, 7, little) != odd.width || get_u16(blob, 9, little) != odd.height {
        return Err(corrupt("dimensions do not echo odd block"));
    }
    let even_rows = get_u16(blob, 11, little);
    if get_u32(blob, 13, little) != odd.crc {
        return Err(corrupt("odd block CRC linkage"));
    }
    let uncompressed = get_u32(blob, 17, little) as usize;
    let compressed = get_u32(blob, 21, little) as usize;
    if blob.len() != 32 + compressed {
        return Err(corrupt("size mismatch"));
    }
    if blob[25] != markers::DATA_START {
        return Err(corrupt("data start marker"));
    }
    if blob[26 + compressed] != markers::DATA_END {
        return Err(corrupt("data end marker"));
    }
    let crc_offset = 27 + compressed;
    let crc = crc32fast::hash(&blob[..crc_offset]);
    if crc != get_u32(blob, crc_offset, little) {
        return Err(corrupt("CRC mismatch"));
    }
    if blob[crc_offset + 4] != markers::EVEN_BLOCK_END {
        return Err(corrupt("end sentinel"));
    }
    Ok(EvenHeader {
        even_rows,
        uncompressed,
        compressed,
    })
}

/// Interleave odd and even row buffers back into a full-height image,
/// swapping each sample into host order as needed.
fn merge_rows<T: SampleValue>(
    odd: &[u8],
    even: &[u8],
    width: usize,
    bands: usize,
    odd_rows: usize,
    even_rows: usize,
    wire_little: bool,
) -> Vec<u8> {
    let row_values = width * bands;
    let row_bytes = row_values * T::BYTES;
    let host_little = host_little_endian();
    let mut out = vec![0u8; (odd_rows + even_rows) * row_bytes];
    let mut copy_row = |src: &[u8], src_row: usize, dst_row: usize| {
        let src_base = src_row * row_bytes;
        let dst_base = dst_row * row_bytes;
        if wire_little == host_little {
            out[dst_base..dst_base + row_bytes]
                .copy_from_slice(&src[src_base..src_base + row_bytes]);
        } else {
            for i in 0..row_values {
                let value = T::read(src, src_base + i * T::BYTES, wire_little);
                value.write(&mut out, dst_base + i * T::BYTES, host_little);
            }
        }
    };
    for row in 0..odd_rows {
        copy_row(odd, row, row * 2);
    }
    for row in 0..even_rows {
        copy_row(even, row, row * 2 + 1);
    }
    out
}

/// Subsample a row buffer by the given steps, swapping into host
/// order as needed.
fn subsample_rows<T: SampleValue>(
    buf: &[u8],
    width: usize,
    bands: usize,
    buf_rows: usize,
    row_step: usize,
    col_step: usize,
    wire_little: bool,
) -> Vec<u8> {
    let row_values = width * bands;
    let out_width = width.div_ceil(col_step);
    let out_rows = buf_rows.div_ceil(row_step);
    let host_little = host_little_endian();
    let mut out = vec![0u8; out_rows * out_width * bands * T::BYTES];
    let mut dst = 0usize;
    for row in (0..buf_rows).step_by(row_step) {
        for col in (0..width).step_by(col_step) {
            let src_base = (row * row_values + col * bands) * T::BYTES;
            for band in 0..bands {
                let value = T::read(buf, src_base + band * T::BYTES, wire_little);
                value.write(&mut out, dst, host_little);
                dst += T::BYTES;
            }
        }
    }
    out
}

macro_rules! dispatch_sample {
    ($sample_type:expr, $call:ident ( $($args:expr),* )) => {
        match $sample_type {
            SampleType::OneBit
            | SampleType::TwoBit
            | SampleType::FourBit
            | SampleType::UInt8 => $call::<u8>($($args),*),
            SampleType::Int8 => $call::<i8>($($args),*),
            SampleType::UInt16 => $call::<u16>($($args),*),
            SampleType::Int16 => $call::<i16>($($args),*),
            SampleType::UInt32 => $call::<u32>($($args),*),
            SampleType::Int32 => $call::<i32>($($args),*),
            SampleType::Float32 => $call::<f32>($($args),*),
            SampleType::Float64 => $call::<f64>($($args),*),
        }
    };
}

fn check_scale(scale: Scale, odd: &OddHeader, has_even: bool) -> RastileResult<()> {
    if odd.sample_type.is_sub_byte() {
        if scale != Scale::Full {
            return Err(RastileError::invalid(format!(
                "{} tiles decode at scale 1 only",
                odd.sample_type.label()
            )));
        }
        return Ok(());
    }
    match scale {
        Scale::Full => {
            if odd.compression.is_full_image() {
                if has_even {
                    return Err(RastileError::invalid(format!(
                        "{} tiles carry no even block",
                        odd.compression.label()
                    )));
                }
            } else if !has_even && odd.height > 1 {
                return Err(RastileError::invalid(
                    "scale 1 requires both odd and even blocks",
                ));
            }
        }
        Scale::Half | Scale::Quarter | Scale::Eighth => {}
    }
    Ok(())
}

/// Decompress a generic (NONE/DEFLATE/LZMA) payload.
/// `compressed == uncompressed` marks a raw store.
fn generic_decompress(
    compression: Compression,
    payload: &[u8],
    uncompressed: usize,
) -> RastileResult<Vec<u8>> {
    if payload.len() == uncompressed {
        return Ok(payload.to_vec());
    }
    match compression {
        Compression::Deflate => backends::deflate_decompress(payload, uncompressed),
        Compression::Lzma => backends::lzma_decompress(payload, uncompressed),
        Compression::None => Err(RastileError::corrupt(
            "uncompressed payload with mismatched size",
        )),
        other => Err(RastileError::corrupt(format!(
            "{} payload with generic framing",
            other.label()
        ))),
    }
}

/// Decode an Odd block (and optional Even companion) back into a
/// raster at the requested scale.
///
/// `external_palette` supplies the coverage palette for paletted
/// encodings whose payloads do not embed one (NONE/DEFLATE/LZMA).
pub fn decode_tile(
    scale: Scale,
    odd_blob: &[u8],
    even_blob: Option<&[u8]>,
    external_palette: Option<Palette>,
) -> RastileResult<Raster> {
    let odd = check_blob_odd(odd_blob)?;
    let even = even_blob
        .map(|blob| check_blob_even(blob, &odd))
        .transpose()?;
    check_scale(scale, &odd, even.is_some())?;

    let factor = scale.factor();
    let out_width = scale.scaled_len(odd.width as usize) as u16;
    let out_height = scale.scaled_len(odd.height as usize) as u16;
    let width = odd.width as usize;
    let bands = odd.bands as usize;

    let mut palette = None;
    let pixels: Vec<u8> = match odd.compression {
        Compression::None | Compression::Deflate | Compression::Lzma => {
            let raw = generic_decompress(odd.compression, odd.payload(odd_blob), odd.uncompressed)?;
            if odd.sample_type.is_sub_byte() {
                let stride = odd.row_stride_odd as usize;
                if raw.len() != stride * odd.height as usize {
                    return Err(RastileError::corrupt("packed payload size mismatch"));
                }
                match odd.sample_type {
                    SampleType::OneBit => {
                        subbyte::unpack_1bit(width, odd.height as usize, stride, &raw)?
                    }
                    SampleType::TwoBit => {
                        subbyte::unpack_2bit(width, odd.height as usize, stride, &raw)?
                    }
                    _ => subbyte::unpack_4bit(width, odd.height as usize, stride, &raw)?,
                }
            } else {
                let row_bytes = width * bands * odd.sample_type.size();
                if raw.len() != row_bytes * odd.odd_rows as usize {
                    return Err(RastileError::corrupt("odd payload size mismatch"));
                }
                if scale == Scale::Full {
                    let even_header = even.as_ref();
                    let even_raw = match (even_header, even_blob) {
                        (Some(header), Some(blob)) => generic_decompress(
                            odd.compression,
                            header.payload(blob),
                            header.uncompressed,
                        )?,
                        _ => Vec::new(),
                    };
                    let even_rows = even_header.map(|h| h.even_rows as usize).unwrap_or(0);
                    if even_raw.len() != row_bytes * even_rows {
                        return Err(RastileError::corrupt("even payload size mismatch"));
                    }
                    dispatch_sample!(
                        odd.sample_type,
                        merge_rows(
                            &raw,
                            &even_raw,
                            width,
                            bands,
                            odd.odd_rows as usize,
                            even_rows,
                            odd.little
                        )
                    )
                } else {
                    dispatch_sample!(
                        odd.sample_type,
                        subsample_rows(
                            &raw,
                            width,
                            bands,
                            odd.odd_rows as usize,
                            factor / 2,
                            factor,
                            odd.little
                        )
                    )
                }
            }
        }
        Compression::Png | Compression::Gif => {
            let decode = |payload: &[u8]| -> RastileResult<backends::DecodedImage> {
                match odd.compression {
                    Compression::Png => backends::png_decode(payload),
                    _ => backends::gif_decode(payload),
                }
            };
            if odd.sample_type.is_sub_byte() {
                let image = decode(odd.payload(odd_blob))?;
                if (image.width, image.height) != (odd.width, odd.height) {
                    return Err(RastileError::decode("embedded image dimensions mismatch"));
                }
                if odd.pixel_type == PixelType::Palette {
                    palette = image.palette;
                }
                image.pixels
            } else {
                let odd_image = decode(odd.payload(odd_blob))?;
                if (odd_image.width, odd_image.height) != (odd.width, odd.odd_rows) {
                    return Err(RastileError::decode("odd image dimensions mismatch"));
                }
                if odd.pixel_type == PixelType::Palette {
                    palette = odd_image.palette;
                }
                if odd_image.channels as usize != bands {
                    return Err(RastileError::decode("odd image channel mismatch"));
                }
                if scale == Scale::Full {
                    let (even_header, even_blob) = match (even.as_ref(), even_blob) {
                        (Some(header), Some(blob)) => (header, blob),
                        _ => {
                            // Single-row tile: the odd image is the image.
                            return finish(
                                odd,
                                out_width,
                                out_height,
                                odd_image.pixels,
                                palette.or(external_palette),
                                odd_blob,
                                scale,
                            );
                        }
                    };
                    let even_image = decode(even_header.payload(even_blob))?;
                    if (even_image.width, even_image.height) != (odd.width, even_header.even_rows)
                    {
                        return Err(RastileError::decode("even image dimensions mismatch"));
                    }
                    merge_rows::<u8>(
                        &odd_image.pixels,
                        &even_image.pixels,
                        width * bands,
                        1,
                        odd.odd_rows as usize,
                        even_header.even_rows as usize,
                        host_little_endian(),
                    )
                } else {
                    subsample_rows::<u8>(
                        &odd_image.pixels,
                        width,
                        bands,
                        odd.odd_rows as usize,
                        factor / 2,
                        factor,
                        host_little_endian(),
                    )
                }
            }
        }
        Compression::Jpeg => {
            let image = backends::jpeg_decode_scaled(odd.payload(odd_blob), factor)?;
            if image.channels as usize != bands {
                return Err(RastileError::decode("jpeg channel mismatch"));
            }
            if (image.width, image.height) != (out_width, out_height) {
                return Err(RastileError::decode(format!(
                    "jpeg produced {}x{}, expected {out_width}x{out_height}",
                    image.width, image.height
                )));
            }
            image.pixels
        }
        Compression::LossyWebp | Compression::LosslessWebp => {
            let image = backends::webp_decode(odd.payload(odd_blob))?;
            if (image.width, image.height) != (odd.width, odd.height) {
                return Err(RastileError::decode("webp dimensions mismatch"));
            }
            let rgb: Vec<u8> = if image.channels == 4 {
                image
                    .pixels
                    .chunks_exact(4)
                    .flat_map(|p| [p[0], p[1], p[2]])
                    .collect()
            } else {
                image.pixels
            };
            let full: Vec<u8> = if odd.pixel_type == PixelType::Grayscale {
                rgb.chunks_exact(3).map(|p| p[0]).collect()
            } else {
                rgb
            };
            if factor > 1 {
                subsample_rows::<u8>(
                    &full,
                    width,
                    bands,
                    odd.height as usize,
                    factor,
                    factor,
                    host_little_endian(),
                )
            } else {
                full
            }
        }
        Compression::CcittFax4 => {
            backends::fax4_decode(odd.payload(odd_blob), odd.width, odd.height)?
        }
    };

    finish(
        odd,
        out_width,
        out_height,
        pixels,
        palette.or(external_palette),
        odd_blob,
        scale,
    )
}

/// Assemble the final raster: size check, palette attach, mask decode
/// and rescale.
fn finish(
    odd: OddHeader,
    out_width: u16,
    out_height: u16,
    pixels: Vec<u8>,
    palette: Option<Palette>,
    odd_blob: &[u8],
    scale: Scale,
) -> RastileResult<Raster> {
    let expected = buffer_size(out_width, out_height, odd.sample_type, odd.bands);
    if pixels.len() != expected {
        return Err(RastileError::corrupt(format!(
            "decoded {} bytes, expected {expected}",
            pixels.len()
        )));
    }
    let palette = if odd.pixel_type == PixelType::Palette {
        Some(palette.ok_or_else(|| {
            RastileError::invalid("paletted tile decoded without a palette")
        })?)
    } else {
        None
    };
    let mut raster = Raster::new(
        out_width,
        out_height,
        odd.sample_type,
        odd.pixel_type,
        odd.bands,
        pixels,
        palette,
    )?;
    if let Some(mask_rle) = odd.mask(odd_blob) {
        if odd.uncompressed_mask != odd.width as usize * odd.height as usize {
            return Err(RastileError::corrupt("mask size mismatch"));
        }
        let full = rle::decode_mask(odd.width as usize, odd.height as usize, mask_rle)?;
        let factor = scale.factor();
        let mask = if factor == 1 {
            full
        } else {
            let mut scaled =
                Vec::with_capacity(out_width as usize * out_height as usize);
            for row in (0..odd.height as usize).step_by(factor) {
                for col in (0..odd.width as usize).step_by(factor) {
                    scaled.push(full[row * odd.width as usize + col]);
                }
            }
            scaled
        };
        raster = raster.with_mask(mask)?;
    }
    Ok(raster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_tile;

    fn grid_raster(width: u16, height: u16) -> Raster {
        let mut data = Vec::with_capacity(width as usize * height as usize * 2);
        for i in 0..width as usize * height as usize {
            data.extend_from_slice(&(i as u16 % 1000).to_ne_bytes());
        }
        Raster::new(
            width,
            height,
            SampleType::UInt16,
            PixelType::DataGrid,
            1,
            data,
            None,
        )
        .unwrap()
    }

    #[test]
    fn split_round_trip_scale_1() {
        let raster = grid_raster(16, 10);
        let tile = encode_tile(&raster, Compression::Deflate, 100, true).unwrap();
        let back = decode_tile(Scale::Full, &tile.odd, tile.even.as_deref(), None).unwrap();
        assert_eq!(back.data(), raster.data());
        assert_eq!((back.width(), back.height()), (16, 10));
    }

    #[test]
    fn scale_2_matches_stride_subsampling() {
        let raster = grid_raster(16, 10);
        let tile = encode_tile(&raster, Compression::None, 100, true).unwrap();
        let half = decode_tile(Scale::Half, &tile.odd, None, None).unwrap();
        assert_eq!((half.width(), half.height()), (8, 5));
        for row in 0..5u16 {
            for col in 0..8u16 {
                assert_eq!(
                    half.sample_f64(row, col, 0),
                    raster.sample_f64(row * 2, col * 2, 0)
                );
            }
        }
    }

    #[test]
    fn missing_even_block_rejected_at_scale_1() {
        let raster = grid_raster(16, 10);
        let tile = encode_tile(&raster, Compression::None, 100, true).unwrap();
        assert!(matches!(
            decode_tile(Scale::Full, &tile.odd, None, None),
            Err(RastileError::InvalidArgument(_))
        ));
    }

    #[test]
    fn bit_flips_detected() {
        let raster = grid_raster(16, 8);
        let tile = encode_tile(&raster, Compression::Deflate, 100, true).unwrap();
        // Flip one bit in each byte position except the end sentinel.
        for position in [0, 1, 2, 10, 31, tile.odd.len() - 5] {
            let mut bad = tile.odd.to_vec();
            bad[position] ^= 0x04;
            assert!(
                decode_tile(Scale::Half, &bad, None, None).is_err(),
                "bit flip at {position} went unnoticed"
            );
        }
    }

    #[test]
    fn even_block_linkage_enforced() {
        let a = encode_tile(&grid_raster(16, 8), Compression::None, 100, true).unwrap();
        let b = encode_tile(&grid_raster(16, 8), Compression::Deflate, 100, true).unwrap();
        // Even block of a different odd block fails the CRC linkage.
        assert!(matches!(
            decode_tile(Scale::Full, &a.odd, b.even.as_deref(), None),
            Err(RastileError::CorruptBlock(_))
        ));
    }

    #[test]
    fn big_endian_wire_round_trip() {
        let raster = grid_raster(12, 6);
        let tile = encode_tile(&raster, Compression::None, 100, false).unwrap();
        let back = decode_tile(Scale::Full, &tile.odd, tile.even.as_deref(), None).unwrap();
        assert_eq!(back.data(), raster.data());
    }

    #[test]
    fn sub_byte_scale_rejected() {
        let data: Vec<u8> = (0..64).map(|i| (i % 2) as u8).collect();
        let raster = Raster::new(
            8,
            8,
            SampleType::OneBit,
            PixelType::Monochrome,
            1,
            data,
            None,
        )
        .unwrap();
        let tile = encode_tile(&raster, Compression::Deflate, 100, true).unwrap();
        assert!(decode_tile(Scale::Full, &tile.odd, None, None).is_ok());
        assert!(matches!(
            decode_tile(Scale::Half, &tile.odd, None, None),
            Err(RastileError::InvalidArgument(_))
        ));
    }

    #[test]
    fn mask_survives_and_rescales() {
        let mut mask = vec![1u8; 16 * 8];
        for col in 0..16 {
            mask[col] = 0; // first row transparent
        }
        let raster = grid_raster(16, 8).with_mask(mask.clone()).unwrap();
        let tile = encode_tile(&raster, Compression::Deflate, 100, true).unwrap();

        let full = decode_tile(Scale::Full, &tile.odd, tile.even.as_deref(), None).unwrap();
        assert_eq!(full.mask().unwrap(), mask.as_slice());

        let quarter = decode_tile(Scale::Quarter, &tile.odd, None, None).unwrap();
        let quarter_mask = quarter.mask().unwrap();
        assert_eq!(quarter_mask.len(), 4 * 2);
        assert!(quarter_mask[..4].iter().all(|&v| v == 0));
        assert!(quarter_mask[4..].iter().all(|&v| v == 1));
    }
}
