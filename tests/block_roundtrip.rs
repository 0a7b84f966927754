//! Odd/Even block round-trips across sample types, compressions and
//! scales.

use rastile::{
    decode_tile, encode_tile, Compression, Palette, PaletteEntry, Pixel, PixelType, Raster,
    RastileError, Sample, SampleType, Scale,
};

/// A deterministic raster of the given shape, with a checkered mask.
fn sample_raster(
    sample_type: SampleType,
    pixel_type: PixelType,
    bands: u8,
    width: u16,
    height: u16,
    with_mask: bool,
) -> Raster {
    let count = width as usize * height as usize * bands as usize;
    let data: Vec<u8> = match sample_type {
        SampleType::OneBit => (0..count).map(|i| (i % 2) as u8).collect(),
        SampleType::TwoBit => (0..count).map(|i| (i % 4) as u8).collect(),
        SampleType::FourBit => (0..count).map(|i| (i % 16) as u8).collect(),
        SampleType::Int8 => (0..count).flat_map(|i| ((i as i8).wrapping_mul(7)).to_ne_bytes()).collect(),
        SampleType::UInt8 => (0..count).map(|i| (i % 251) as u8).collect(),
        SampleType::Int16 => (0..count)
            .flat_map(|i| ((i as i16).wrapping_mul(-13)).to_ne_bytes())
            .collect(),
        SampleType::UInt16 => (0..count)
            .flat_map(|i| ((i as u16).wrapping_mul(31)).to_ne_bytes())
            .collect(),
        SampleType::Int32 => (0..count)
            .flat_map(|i| ((i as i32).wrapping_mul(-104729)).to_ne_bytes())
            .collect(),
        SampleType::UInt32 => (0..count)
            .flat_map(|i| ((i as u32).wrapping_mul(2654435761)).to_ne_bytes())
            .collect(),
        SampleType::Float32 => (0..count)
            .flat_map(|i| (i as f32 * 0.75 - 100.0).to_ne_bytes())
            .collect(),
        SampleType::Float64 => (0..count)
            .flat_map(|i| (i as f64 * -1.25 + 9.5).to_ne_bytes())
            .collect(),
    };
    let palette = match pixel_type {
        PixelType::Palette => {
            let levels = match sample_type {
                SampleType::OneBit => 2,
                SampleType::TwoBit => 4,
                SampleType::FourBit => 16,
                _ => 256,
            };
            let entries = (0..levels)
                .map(|i| PaletteEntry::rgb(i as u8, (i * 3) as u8, 255 - i as u8))
                .collect();
            Some(Palette::from_entries(entries).unwrap())
        }
        _ => None,
    };
    let raster = Raster::new(width, height, sample_type, pixel_type, bands, data, palette).unwrap();
    if with_mask {
        let mask: Vec<u8> = (0..width as usize * height as usize)
            .map(|i| ((i / 3) % 2) as u8)
            .collect();
        raster.with_mask(mask).unwrap()
    } else {
        raster
    }
}

fn assert_round_trip(raster: &Raster, compression: Compression) {
    let tile = encode_tile(raster, compression, 100, true).unwrap();
    let back = decode_tile(Scale::Full, &tile.odd, tile.even.as_deref(), None).unwrap();
    assert_eq!(back.width(), raster.width());
    assert_eq!(back.height(), raster.height());
    assert_eq!(back.data(), raster.data(), "{compression:?} payload");
    assert_eq!(back.mask(), raster.mask(), "{compression:?} mask");
}

#[test]
fn raw_deflate_lzma_round_trips_bit_for_bit() {
    let shapes: &[(SampleType, PixelType, u8)] = &[
        (SampleType::OneBit, PixelType::Monochrome, 1),
        (SampleType::TwoBit, PixelType::Grayscale, 1),
        (SampleType::FourBit, PixelType::Grayscale, 1),
        (SampleType::UInt8, PixelType::Grayscale, 1),
        (SampleType::UInt8, PixelType::Rgb, 3),
        (SampleType::UInt8, PixelType::MultiBand, 4),
        (SampleType::UInt16, PixelType::MultiBand, 2),
        (SampleType::Int8, PixelType::DataGrid, 1),
        (SampleType::Int16, PixelType::DataGrid, 1),
        (SampleType::UInt32, PixelType::DataGrid, 1),
        (SampleType::Int32, PixelType::DataGrid, 1),
        (SampleType::Float32, PixelType::DataGrid, 1),
        (SampleType::Float64, PixelType::DataGrid, 1),
    ];
    for &(sample_type, pixel_type, bands) in shapes {
        for compression in [Compression::None, Compression::Deflate, Compression::Lzma] {
            for with_mask in [false, true] {
                let raster = sample_raster(sample_type, pixel_type, bands, 24, 17, with_mask);
                assert_round_trip(&raster, compression);
            }
        }
    }
}

#[test]
fn paletted_round_trips() {
    for sample_type in [
        SampleType::OneBit,
        SampleType::TwoBit,
        SampleType::FourBit,
        SampleType::UInt8,
    ] {
        let raster = sample_raster(sample_type, PixelType::Palette, 1, 20, 12, false);
        for compression in [Compression::None, Compression::Deflate, Compression::Lzma] {
            // The external palette stands in for what the coverage
            // registry would supply.
            let tile = encode_tile(&raster, compression, 100, true).unwrap();
            let back = decode_tile(
                Scale::Full,
                &tile.odd,
                tile.even.as_deref(),
                raster.palette().cloned(),
            )
            .unwrap();
            assert_eq!(back.data(), raster.data());
            assert_eq!(back.palette(), raster.palette());
        }
        // PNG embeds the palette itself.
        let tile = encode_tile(&raster, Compression::Png, 100, true).unwrap();
        let back = decode_tile(Scale::Full, &tile.odd, tile.even.as_deref(), None).unwrap();
        assert_eq!(back.data(), raster.data());
    }
}

#[test]
fn lossless_image_codecs_round_trip_pixels() {
    let rgb = sample_raster(SampleType::UInt8, PixelType::Rgb, 3, 32, 20, false);
    for compression in [Compression::Png, Compression::LosslessWebp] {
        let tile = encode_tile(&rgb, compression, 100, true).unwrap();
        let back = decode_tile(Scale::Full, &tile.odd, tile.even.as_deref(), None).unwrap();
        assert_eq!(back.data(), rgb.data(), "{compression:?}");
    }

    let gray = sample_raster(SampleType::UInt8, PixelType::Grayscale, 1, 32, 20, false);
    for compression in [
        Compression::Png,
        Compression::Gif,
        Compression::LosslessWebp,
    ] {
        let tile = encode_tile(&gray, compression, 100, true).unwrap();
        let back = decode_tile(Scale::Full, &tile.odd, tile.even.as_deref(), None).unwrap();
        assert_eq!(back.data(), gray.data(), "{compression:?}");
    }
}

#[test]
fn scale_consistency_against_stride_subsampling() {
    let raster = sample_raster(SampleType::UInt16, PixelType::MultiBand, 3, 40, 26, false);
    let tile = encode_tile(&raster, Compression::Deflate, 100, true).unwrap();
    for scale in [Scale::Half, Scale::Quarter, Scale::Eighth] {
        let factor = scale.factor() as u16;
        let scaled = decode_tile(scale, &tile.odd, None, None).unwrap();
        assert_eq!(scaled.width(), 40u16.div_ceil(factor));
        assert_eq!(scaled.height(), 26u16.div_ceil(factor));
        for row in 0..scaled.height() {
            for col in 0..scaled.width() {
                let got = scaled.pixel(row, col).unwrap();
                let want = raster.pixel(row * factor, col * factor).unwrap();
                assert_eq!(
                    got.samples(),
                    want.samples(),
                    "scale {factor} at ({row}, {col})"
                );
            }
        }
    }
}

#[test]
fn any_corruption_is_detected() {
    let raster = sample_raster(SampleType::UInt8, PixelType::Rgb, 3, 16, 12, true);
    let tile = encode_tile(&raster, Compression::Deflate, 100, true).unwrap();
    let odd = tile.odd.to_vec();
    // Flip one bit at every offset except the trailing end-sentinel.
    for offset in 0..odd.len() - 1 {
        let mut bad = odd.clone();
        bad[offset] ^= 0x01;
        assert!(
            decode_tile(Scale::Full, &bad, tile.even.as_deref(), None).is_err(),
            "flip at {offset} went unnoticed"
        );
    }
    let even = tile.even.as_ref().unwrap().to_vec();
    for offset in 0..even.len() - 1 {
        let mut bad = even.clone();
        bad[offset] ^= 0x01;
        assert!(
            decode_tile(Scale::Full, &tile.odd, Some(&bad), None).is_err(),
            "even flip at {offset} went unnoticed"
        );
    }
}

#[test]
fn constant_rgb_tile_scenario() {
    let mut raster = Raster::new(
        512,
        512,
        SampleType::UInt8,
        PixelType::Rgb,
        3,
        vec![0u8; 512 * 512 * 3],
        None,
    )
    .unwrap();
    raster.fill(&Pixel::rgb(10, 20, 30)).unwrap();

    let tile = encode_tile(&raster, Compression::Deflate, 100, true).unwrap();
    assert!(tile.even.is_some());

    let full = decode_tile(Scale::Full, &tile.odd, tile.even.as_deref(), None).unwrap();
    assert!(full.data().chunks_exact(3).all(|p| p == [10, 20, 30]));

    let half = decode_tile(Scale::Half, &tile.odd, None, None).unwrap();
    assert_eq!((half.width(), half.height()), (256, 256));
    assert!(half.data().chunks_exact(3).all(|p| p == [10, 20, 30]));
}

#[test]
fn ccitt_fax_diagonal_scenario() {
    let mut data = vec![0u8; 256 * 256];
    for i in 0..256 {
        data[i * 256 + i] = 1;
    }
    let raster = Raster::new(
        256,
        256,
        SampleType::OneBit,
        PixelType::Monochrome,
        1,
        data,
        None,
    )
    .unwrap();
    let tile = encode_tile(&raster, Compression::CcittFax4, 100, true).unwrap();
    assert!(tile.even.is_none());
    // The G4 stream beats the uncompressed bit rows.
    assert!(tile.odd.len() < 256 * 256 / 8);
    let back = decode_tile(Scale::Full, &tile.odd, None, None).unwrap();
    assert_eq!(back.data(), raster.data());
}

#[test]
fn jpeg_native_scaled_decode_scenario() {
    // A smooth gradient stands in for natural imagery.
    let mut data = Vec::with_capacity(1024 * 1024 * 3);
    for row in 0..1024u32 {
        for col in 0..1024u32 {
            data.push((row / 4) as u8);
            data.push((col / 4) as u8);
            data.push(((row + col) / 8) as u8);
        }
    }
    let raster = Raster::new(
        1024,
        1024,
        SampleType::UInt8,
        PixelType::Rgb,
        3,
        data,
        None,
    )
    .unwrap();
    let tile = encode_tile(&raster, Compression::Jpeg, 75, true).unwrap();
    assert!(tile.even.is_none());

    let eighth = decode_tile(Scale::Eighth, &tile.odd, None, None).unwrap();
    assert_eq!((eighth.width(), eighth.height()), (128, 128));
    assert_eq!(eighth.pixel_type(), PixelType::Rgb);

    // Full decode must not require an even block either.
    let full = decode_tile(Scale::Full, &tile.odd, None, None).unwrap();
    assert_eq!((full.width(), full.height()), (1024, 1024));
    // Lossy, so compare loosely.
    let sample = full.pixel(512, 512).unwrap().sample(0).unwrap();
    match sample {
        Sample::U8(v) => assert!(v.abs_diff(128) < 16),
        other => panic!("unexpected sample {other:?}"),
    }
}

#[test]
fn lossy_webp_keeps_dimensions_at_every_scale() {
    let raster = sample_raster(SampleType::UInt8, PixelType::Rgb, 3, 64, 48, false);
    let tile = encode_tile(&raster, Compression::LossyWebp, 80, true).unwrap();
    assert!(tile.even.is_none());
    for (scale, width, height) in [
        (Scale::Full, 64, 48),
        (Scale::Half, 32, 24),
        (Scale::Quarter, 16, 12),
        (Scale::Eighth, 8, 6),
    ] {
        let decoded = decode_tile(scale, &tile.odd, None, None).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (width, height));
    }
}

#[test]
fn sub_byte_png_rejects_scaled_reads() {
    let raster = sample_raster(SampleType::FourBit, PixelType::Grayscale, 1, 24, 16, false);
    let tile = encode_tile(&raster, Compression::Png, 100, true).unwrap();
    assert!(decode_tile(Scale::Full, &tile.odd, None, None).is_ok());
    assert!(matches!(
        decode_tile(Scale::Quarter, &tile.odd, None, None),
        Err(RastileError::InvalidArgument(_))
    ));
}

#[test]
fn mixed_endian_tiles_interoperate() {
    let raster = sample_raster(SampleType::Float64, PixelType::DataGrid, 1, 20, 14, true);
    for little in [true, false] {
        let tile = encode_tile(&raster, Compression::Lzma, 100, little).unwrap();
        let back = decode_tile(Scale::Full, &tile.odd, tile.even.as_deref(), None).unwrap();
        assert_eq!(back.data(), raster.data(), "little_endian={little}");
        let half = decode_tile(Scale::Half, &tile.odd, None, None).unwrap();
        assert_eq!(
            half.pixel(0, 0).unwrap().samples(),
            raster.pixel(0, 0).unwrap().samples()
        );
    }
}
