//! Uniform wrappers over the compression back-ends.
//!
//! Every backend takes raw bytes plus whatever side data its format
//! needs (palette, quality) and produces a byte sequence, or decodes
//! one back. Backend errors surface as [`RastileError::DecodeFailure`]
//! on the read side and `InvalidArgument` on the write side.

use std::io::{Cursor, Read};

use image::ImageEncoder;

use crate::codec::subbyte;
use crate::error::{alloc_buffer, RastileError, RastileResult};
use crate::palette::{Palette, PaletteEntry};
use crate::pixel::{PixelType, SampleType};

/// A decoded image handed back by the image-format backends. Pixels
/// are unpacked to one byte per sample, `channels` samples per pixel.
#[derive(Debug)]
pub(crate) struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u16,
    pub height: u16,
    pub channels: u8,
    pub palette: Option<Palette>,
}

// --- deflate ---------------------------------------------------------

pub(crate) fn deflate_compress(raw: &[u8]) -> RastileResult<Vec<u8>> {
    let mut encoder =
        flate2::read::ZlibEncoder::new(Cursor::new(raw), flate2::Compression::default());
    let mut out = Vec::new();
    encoder.read_to_end(&mut out)?;
    Ok(out)
}

pub(crate) fn deflate_decompress(data: &[u8], expected: usize) -> RastileResult<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(Cursor::new(data));
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| RastileError::decode(format!("deflate: {e}")))?;
    if out.len() != expected {
        return Err(RastileError::decode(format!(
            "deflate produced {} bytes, expected {expected}",
            out.len()
        )));
    }
    Ok(out)
}

// --- lzma ------------------------------------------------------------

pub(crate) fn lzma_compress(raw: &[u8]) -> RastileResult<Vec<u8>> {
    let mut encoder = xz2::read::XzEncoder::new(Cursor::new(raw), 6);
    let mut out = Vec::new();
    encoder.read_to_end(&mut out)?;
    Ok(out)
}

pub(crate) fn lzma_decompress(data: &[u8], expected: usize) -> RastileResult<Vec<u8>> {
    let mut decoder = xz2::read::XzDecoder::new(Cursor::new(data));
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| RastileError::decode(format!("lzma: {e}")))?;
    if out.len() != expected {
        return Err(RastileError::decode(format!(
            "lzma produced {} bytes, expected {expected}",
            out.len()
        )));
    }
    Ok(out)
}

// --- png -------------------------------------------------------------

/// Encode `rows` scanlines of unpacked samples as PNG. Sub-byte
/// sample types are bit-packed to the matching PNG depth.
pub(crate) fn png_encode(
    samples: &[u8],
    width: u16,
    rows: u16,
    sample_type: SampleType,
    pixel_type: PixelType,
    palette: Option<&Palette>,
) -> RastileResult<Vec<u8>> {
    let (color, depth) = match (pixel_type, sample_type) {
        (PixelType::Palette, _) => (
            png::ColorType::Indexed,
            png_depth(sample_type)?,
        ),
        (PixelType::Monochrome | PixelType::Grayscale, _) => {
            (png::ColorType::Grayscale, png_depth(sample_type)?)
        }
        (PixelType::Rgb, SampleType::UInt8) => (png::ColorType::Rgb, png::BitDepth::Eight),
        _ => {
            return Err(RastileError::invalid(format!(
                "PNG cannot carry {} {}",
                sample_type.label(),
                pixel_type.label()
            )))
        }
    };
    let packed;
    let scanlines: &[u8] = match sample_type {
        SampleType::OneBit => {
            packed = subbyte::pack_1bit(width as usize, rows as usize, samples);
            &packed
        }
        SampleType::TwoBit => {
            packed = subbyte::pack_2bit(width as usize, rows as usize, samples);
            &packed
        }
        SampleType::FourBit => {
            packed = subbyte::pack_4bit(width as usize, rows as usize, samples);
            &packed
        }
        _ => samples,
    };
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width as u32, rows as u32);
        encoder.set_color(color);
        encoder.set_depth(depth);
        if color == png::ColorType::Indexed {
            let palette = palette
                .ok_or_else(|| RastileError::invalid("indexed PNG requires a palette"))?;
            encoder.set_palette(palette.flat_rgb());
        }
        let mut writer = encoder
            .write_header()
            .map_err(|e| RastileError::invalid(format!("png: {e}")))?;
        writer
            .write_image_data(scanlines)
            .map_err(|e| RastileError::invalid(format!("png: {e}")))?;
    }
    Ok(out)
}

fn png_depth(sample_type: SampleType) -> RastileResult<png::BitDepth> {
    match sample_type {
        SampleType::OneBit => Ok(png::BitDepth::One),
        SampleType::TwoBit => Ok(png::BitDepth::Two),
        SampleType::FourBit => Ok(png::BitDepth::Four),
        SampleType::UInt8 => Ok(png::BitDepth::Eight),
        other => Err(RastileError::invalid(format!(
            "PNG cannot carry {} samples",
            other.label()
        ))),
    }
}

pub(crate) fn png_decode(data: &[u8]) -> RastileResult<DecodedImage> {
    let decoder = png::Decoder::new(Cursor::new(data));
    let mut reader = decoder
        .read_info()
        .map_err(|e| RastileError::decode(format!("png: {e}")))?;
    let mut buf = alloc_buffer(reader.output_buffer_size())?;
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| RastileError::decode(format!("png: {e}")))?;
    let width = info.width as u16;
    let height = info.height as u16;
    let palette = reader
        .info()
        .palette
        .as_ref()
        .map(|flat| {
            let entries = flat
                .chunks_exact(3)
                .map(|rgb| PaletteEntry::rgb(rgb[0], rgb[1], rgb[2]))
                .collect();
            Palette::from_entries(entries)
        })
        .transpose()?;
    buf.truncate(info.buffer_size());
    let (pixels, channels) = match (info.color_type, info.bit_depth) {
        (png::ColorType::Rgb, png::BitDepth::Eight) => (buf, 3),
        (png::ColorType::Grayscale | png::ColorType::Indexed, depth) => {
            let bits = match depth {
                png::BitDepth::One => 1,
                png::BitDepth::Two => 2,
                png::BitDepth::Four => 4,
                png::BitDepth::Eight => 8,
                png::BitDepth::Sixteen => {
                    return Err(RastileError::decode("png: 16-bit depth not supported"))
                }
            };
            if bits == 8 {
                (buf, 1)
            } else {
                let stride = subbyte::row_stride(width as usize, bits);
                let unpacked = match bits {
                    1 => subbyte::unpack_1bit(width as usize, height as usize, stride, &buf)?,
                    2 => subbyte::unpack_2bit(width as usize, height as usize, stride, &buf)?,
                    _ => subbyte::unpack_4bit(width as usize, height as usize, stride, &buf)?,
                };
                (unpacked, 1)
            }
        }
        (color, depth) => {
            return Err(RastileError::decode(format!(
                "png: unsupported {color:?}/{depth:?}"
            )))
        }
    };
    Ok(DecodedImage {
        pixels,
        width,
        height,
        channels,
        palette,
    })
}

// --- gif -------------------------------------------------------------

/// Encode indexed samples (one byte each) as a single-frame GIF with
/// the given palette as the global color table.
pub(crate) fn gif_encode(
    samples: &[u8],
    width: u16,
    rows: u16,
    palette: &Palette,
) -> RastileResult<Vec<u8>> {
    // GIF global color tables hold a power-of-two entry count.
    let mut flat = palette.flat_rgb();
    let mut size = 2usize;
    while size < palette.len() {
        size *= 2;
    }
    flat.resize(size * 3, 0);
    let mut out = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut out, width, rows, &flat)
            .map_err(|e| RastileError::invalid(format!("gif: {e}")))?;
        let frame = gif::Frame {
            width,
            height: rows,
            buffer: std::borrow::Cow::Borrowed(samples),
            ..gif::Frame::default()
        };
        encoder
            .write_frame(&frame)
            .map_err(|e| RastileError::invalid(format!("gif: {e}")))?;
    }
    Ok(out)
}

pub(crate) fn gif_decode(data: &[u8]) -> RastileResult<DecodedImage> {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = options
        .read_info(Cursor::new(data))
        .map_err(|e| RastileError::decode(format!("gif: {e}")))?;
    let global_palette = decoder.global_palette().map(|flat| flat.to_vec());
    let frame = decoder
        .read_next_frame()
        .map_err(|e| RastileError::decode(format!("gif: {e}")))?
        .ok_or_else(|| RastileError::decode("gif: no frame"))?;
    let flat = frame
        .palette
        .clone()
        .or(global_palette)
        .ok_or_else(|| RastileError::decode("gif: no palette"))?;
    let entries = flat
        .chunks_exact(3)
        .map(|rgb| PaletteEntry::rgb(rgb[0], rgb[1], rgb[2]))
        .collect();
    Ok(DecodedImage {
        pixels: frame.buffer.to_vec(),
        width: frame.width,
        height: frame.height,
        channels: 1,
        palette: Some(Palette::from_entries(entries)?),
    })
}

// --- jpeg ------------------------------------------------------------

/// Encode uint8 grayscale or RGB pixels as JPEG at the given quality.
pub(crate) fn jpeg_encode(
    pixels: &[u8],
    width: u16,
    height: u16,
    channels: u8,
    quality: u8,
) -> RastileResult<Vec<u8>> {
    let color = match channels {
        1 => image::ExtendedColorType::L8,
        3 => image::ExtendedColorType::Rgb8,
        other => {
            return Err(RastileError::invalid(format!(
                "JPEG cannot carry {other} channels"
            )))
        }
    };
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .write_image(pixels, width as u32, height as u32, color)
        .map_err(|e| RastileError::invalid(format!("jpeg: {e}")))?;
    Ok(out)
}

/// Decode a JPEG, using the codec's native scaled decode for
/// `scale` in {2, 4, 8}.
pub(crate) fn jpeg_decode_scaled(data: &[u8], scale: usize) -> RastileResult<DecodedImage> {
    let mut decoder = jpeg::Decoder::new(Cursor::new(data));
    decoder
        .read_info()
        .map_err(|e| RastileError::decode(format!("jpeg: {e}")))?;
    let info = decoder
        .info()
        .ok_or_else(|| RastileError::decode("jpeg: missing header info"))?;
    let (mut width, mut height) = (info.width, info.height);
    if scale > 1 {
        let req_w = (info.width as usize).div_ceil(scale) as u16;
        let req_h = (info.height as usize).div_ceil(scale) as u16;
        let (w, h) = decoder
            .scale(req_w, req_h)
            .map_err(|e| RastileError::decode(format!("jpeg: {e}")))?;
        width = w;
        height = h;
    }
    let pixels = decoder
        .decode()
        .map_err(|e| RastileError::decode(format!("jpeg: {e}")))?;
    let channels = match info.pixel_format {
        jpeg::PixelFormat::L8 => 1,
        jpeg::PixelFormat::RGB24 => 3,
        other => {
            return Err(RastileError::decode(format!(
                "jpeg: unsupported pixel format {other:?}"
            )))
        }
    };
    Ok(DecodedImage {
        pixels,
        width,
        height,
        channels,
        palette: None,
    })
}

// --- webp ------------------------------------------------------------

/// Encode uint8 RGB pixels as WebP; grayscale callers expand to RGB
/// first.
pub(crate) fn webp_encode(
    rgb: &[u8],
    width: u16,
    height: u16,
    quality: u8,
    lossless: bool,
) -> RastileResult<Vec<u8>> {
    let encoder = webp::Encoder::from_rgb(rgb, width as u32, height as u32);
    let memory = if lossless {
        encoder.encode_lossless()
    } else {
        encoder.encode(quality.clamp(1, 100) as f32)
    };
    Ok(memory.to_vec())
}

pub(crate) fn webp_decode(data: &[u8]) -> RastileResult<DecodedImage> {
    let image = webp::Decoder::new(data)
        .decode()
        .ok_or_else(|| RastileError::decode("webp: decode failed"))?;
    let width = image.width() as u16;
    let height = image.height() as u16;
    let pixels = image.to_vec();
    let area = width as usize * height as usize;
    if area == 0 || pixels.len() % area != 0 {
        return Err(RastileError::decode("webp: unexpected buffer size"));
    }
    let channels = (pixels.len() / area) as u8;
    if channels != 3 && channels != 4 {
        return Err(RastileError::decode(format!(
            "webp: unexpected {channels} channels"
        )));
    }
    Ok(DecodedImage {
        pixels,
        width,
        height,
        channels,
        palette: None,
    })
}

// --- ccitt fax group 4 -----------------------------------------------

/// Encode 1-bit monochrome samples (1 = black) as CCITT G4.
pub(crate) fn fax4_encode(samples: &[u8], width: u16, height: u16) -> RastileResult<Vec<u8>> {
    let mut encoder = fax::encoder::Encoder::new(fax::VecWriter::new());
    for row in samples.chunks_exact(width as usize).take(height as usize) {
        let line = row.iter().map(|&v| {
            if v == 1 {
                fax::Color::Black
            } else {
                fax::Color::White
            }
        });
        encoder
            .encode_line(line, width)
            .map_err(|e| RastileError::invalid(format!("ccittfax4: {e}")))?;
    }
    let writer = encoder
        .finish()
        .map_err(|e| RastileError::invalid(format!("ccittfax4: {e}")))?;
    Ok(writer.finish())
}

/// Decode CCITT G4 back to 1-bit monochrome samples.
pub(crate) fn fax4_decode(data: &[u8], width: u16, height: u16) -> RastileResult<Vec<u8>> {
    let mut samples = Vec::with_capacity(width as usize * height as usize);
    fax::decoder::decode_g4(data.iter().copied(), width, Some(height), |transitions| {
        for color in fax::decoder::pels(transitions, width) {
            samples.push(match color {
                fax::Color::Black => 1,
                fax::Color::White => 0,
            });
        }
    })
    .ok_or_else(|| RastileError::decode("ccittfax4: decode failed"))?;
    if samples.len() != width as usize * height as usize {
        return Err(RastileError::decode(format!(
            "ccittfax4: decoded {} samples, expected {}",
            samples.len(),
            width as usize * height as usize
        )));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_round_trip() {
        let raw: Vec<u8> = (0..200u16).map(|i| (i % 7) as u8).collect();
        let packed = deflate_compress(&raw).unwrap();
        assert!(packed.len() < raw.len());
        assert_eq!(deflate_decompress(&packed, raw.len()).unwrap(), raw);
    }

    #[test]
    fn lzma_round_trip() {
        let raw = vec![42u8; 4096];
        let packed = lzma_compress(&raw).unwrap();
        assert!(packed.len() < raw.len());
        assert_eq!(lzma_decompress(&packed, raw.len()).unwrap(), raw);
    }

    #[test]
    fn png_gray_round_trip() {
        let samples: Vec<u8> = (0..64).map(|i| (i * 4) as u8).collect();
        let data = png_encode(
            &samples,
            8,
            8,
            SampleType::UInt8,
            PixelType::Grayscale,
            None,
        )
        .unwrap();
        let image = png_decode(&data).unwrap();
        assert_eq!((image.width, image.height, image.channels), (8, 8, 1));
        assert_eq!(image.pixels, samples);
    }

    #[test]
    fn png_sub_byte_indexed_round_trip() {
        let samples: Vec<u8> = (0..30).map(|i| (i % 4) as u8).collect();
        let palette = Palette::gray_ramp(SampleType::TwoBit).unwrap();
        let data = png_encode(
            &samples,
            5,
            6,
            SampleType::TwoBit,
            PixelType::Palette,
            Some(&palette),
        )
        .unwrap();
        let image = png_decode(&data).unwrap();
        assert_eq!(image.pixels, samples);
        assert_eq!(image.palette.unwrap().len(), 4);
    }

    #[test]
    fn gif_round_trip() {
        let samples: Vec<u8> = (0..48).map(|i| (i % 5) as u8).collect();
        let palette = Palette::new(5).unwrap();
        let data = gif_encode(&samples, 8, 6, &palette).unwrap();
        let image = gif_decode(&data).unwrap();
        assert_eq!((image.width, image.height), (8, 6));
        assert_eq!(image.pixels, samples);
    }

    #[test]
    fn jpeg_round_trip_dims() {
        let pixels = vec![128u8; 64 * 64 * 3];
        let data = jpeg_encode(&pixels, 64, 64, 3, 85).unwrap();
        let image = jpeg_decode_scaled(&data, 1).unwrap();
        assert_eq!((image.width, image.height, image.channels), (64, 64, 3));
        // A solid color survives lossy compression unchanged.
        assert!(image.pixels.iter().all(|&v| v.abs_diff(128) <= 2));
    }

    #[test]
    fn jpeg_scaled_decode() {
        let pixels = vec![200u8; 64 * 64];
        let data = jpeg_encode(&pixels, 64, 64, 1, 90).unwrap();
        let image = jpeg_decode_scaled(&data, 8).unwrap();
        assert_eq!((image.width, image.height, image.channels), (8, 8, 1));
    }

    #[test]
    fn webp_lossless_round_trip() {
        let mut rgb = Vec::with_capacity(16 * 16 * 3);
        for i in 0..16 * 16 {
            rgb.extend_from_slice(&[(i % 256) as u8, 10, 200]);
        }
        let data = webp_encode(&rgb, 16, 16, 100, true).unwrap();
        let image = webp_decode(&data).unwrap();
        assert_eq!((image.width, image.height), (16, 16));
        if image.channels == 3 {
            assert_eq!(image.pixels, rgb);
        } else {
            let stripped: Vec<u8> = image
                .pixels
                .chunks_exact(4)
                .flat_map(|p| [p[0], p[1], p[2]])
                .collect();
            assert_eq!(stripped, rgb);
        }
    }

    #[test]
    fn fax4_round_trip() {
        let width = 32u16;
        let height = 32u16;
        let mut samples = vec![0u8; width as usize * height as usize];
        for i in 0..32 {
            samples[i * width as usize + i] = 1;
        }
        let data = fax4_encode(&samples, width, height).unwrap();
        assert!(data.len() < samples.len());
        assert_eq!(fax4_decode(&data, width, height).unwrap(), samples);
    }
}
