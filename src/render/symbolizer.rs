//! The raster symbolizer pipeline: band selection, contrast
//! enhancement LUTs and color maps.

use log::warn;

use crate::error::{RastileError, RastileResult};
use crate::pixel::{PixelType, SampleType};
use crate::raster::Raster;
use crate::stats::{BandStatistics, RasterStatistics};

/// How one selected band is stretched into 0..=255.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContrastEnhancement {
    /// Identity for byte-ranged bands, plain linear rescale otherwise.
    None,
    /// Linear stretch between the 2nd and 98th percentile of the band
    /// histogram.
    Normalize,
    /// Gamma curve: `LUT[i] = round(255 * (i / 255) ^ (1 / gamma))`.
    Gamma(f64),
    /// Histogram equalization: the normalized cumulative histogram
    /// scaled to 0..=255.
    Histogram,
}

/// False-color selection of three bands into uint8 RGB output.
#[derive(Debug, Clone)]
pub struct TripleBandSymbolizer {
    /// Source band for the red channel.
    pub red_band: u8,
    /// Source band for the green channel.
    pub green_band: u8,
    /// Source band for the blue channel.
    pub blue_band: u8,
    /// Per-channel contrast enhancement.
    pub red_contrast: ContrastEnhancement,
    /// Per-channel contrast enhancement.
    pub green_contrast: ContrastEnhancement,
    /// Per-channel contrast enhancement.
    pub blue_contrast: ContrastEnhancement,
}

/// Single-band selection: grayscale output, or RGB through a color
/// map.
#[derive(Debug, Clone)]
pub struct MonoBandSymbolizer {
    /// The selected band.
    pub band: u8,
    /// Contrast enhancement applied before output or lookup.
    pub contrast: ContrastEnhancement,
    /// Optional color map turning the band into RGB.
    pub color_map: Option<ColorMap>,
}

/// The symbolizer modes.
#[derive(Debug, Clone)]
pub enum RasterSymbolizer {
    /// No styling: the rendered raster passes through unchanged.
    RawCopy,
    /// False-color triple-band selection.
    TripleBand(TripleBandSymbolizer),
    /// Mono-band selection.
    MonoBand(MonoBandSymbolizer),
}

/// One color-map stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMapEntry {
    /// The sample value this stop anchors.
    pub value: f64,
    /// The RGB color at this stop.
    pub color: (u8, u8, u8),
}

/// A mapping from scalar sample values to RGB.
#[derive(Debug, Clone)]
pub struct ColorMap {
    /// Piecewise-linear interpolation between stops when true, a step
    /// function otherwise.
    pub interpolate: bool,
    /// The color for values no rule covers.
    pub default_color: (u8, u8, u8),
    /// Ordered stops.
    pub entries: Vec<ColorMapEntry>,
}

/// A 256-entry lookup built from one band's statistics.
#[derive(Debug, Clone)]
struct BandLut {
    min_value: f64,
    max_value: f64,
    scale_factor: f64,
    lut: Option<[u8; 256]>,
    identity: bool,
}

impl BandLut {
    fn build(kind: ContrastEnhancement, band: &BandStatistics) -> Self {
        match kind {
            ContrastEnhancement::None => Self::build_none(band),
            ContrastEnhancement::Normalize => {
                let (min_value, max_value, scale_factor) = compute_stretching(band);
                Self {
                    min_value,
                    max_value,
                    scale_factor,
                    lut: None,
                    identity: false,
                }
            }
            ContrastEnhancement::Gamma(gamma) => {
                if !(gamma.is_finite() && gamma > 0.0) {
                    // An unusable gamma degrades to trivial scaling.
                    warn!("ignoring invalid gamma {gamma}");
                    return Self::build_none(band);
                }
                let mut lut = [0u8; 256];
                for (i, slot) in lut.iter_mut().enumerate() {
                    *slot = (255.0 * (i as f64 / 255.0).powf(1.0 / gamma)).round() as u8;
                }
                let (min_value, max_value) = band_range(band);
                Self {
                    min_value,
                    max_value,
                    scale_factor: (max_value - min_value) / 255.0,
                    lut: Some(lut),
                    identity: false,
                }
            }
            ContrastEnhancement::Histogram => {
                let histogram = band.histogram();
                let total: f64 = histogram.iter().sum();
                let mut lut = [0u8; 256];
                if total > 0.0 {
                    let mut cumulative = 0.0;
                    for (i, slot) in lut.iter_mut().enumerate() {
                        cumulative += histogram.get(i).copied().unwrap_or(0.0);
                        *slot = (255.0 * cumulative / total).round() as u8;
                    }
                }
                let (min_value, max_value) = band_range(band);
                Self {
                    min_value,
                    max_value,
                    scale_factor: (max_value - min_value) / 255.0,
                    lut: Some(lut),
                    identity: false,
                }
            }
        }
    }

    fn build_none(band: &BandStatistics) -> Self {
        let (min_value, max_value) = band_range(band);
        if min_value >= 0.0 && max_value <= 255.0 {
            Self {
                min_value: 0.0,
                max_value: 255.0,
                scale_factor: 1.0,
                lut: None,
                identity: true,
            }
        } else {
            Self {
                min_value,
                max_value,
                scale_factor: (max_value - min_value) / 255.0,
                lut: None,
                identity: false,
            }
        }
    }

    /// The scaled 0..=255 index for a sample value.
    fn index(&self, value: f64) -> usize {
        if self.scale_factor <= 0.0 {
            return 0;
        }
        let scaled = (value - self.min_value) / self.scale_factor;
        scaled.clamp(0.0, 255.0) as usize
    }

    fn apply(&self, value: f64) -> u8 {
        if self.identity {
            return value.clamp(0.0, 255.0) as u8;
        }
        let index = self.index(value);
        match &self.lut {
            Some(lut) => lut[index],
            None => index as u8,
        }
    }
}

fn band_range(band: &BandStatistics) -> (f64, f64) {
    if band.min() <= band.max() {
        (band.min(), band.max())
    } else {
        // No samples ever reached this band.
        (0.0, 255.0)
    }
}

/// The 2nd/98th percentile stretch bounds from a band histogram.
fn compute_stretching(band: &BandStatistics) -> (f64, f64, f64) {
    let histogram = band.histogram();
    let bins = histogram.len();
    let total: f64 = histogram.iter().sum();
    let (band_min, band_max) = band_range(band);
    if total <= 0.0 || bins < 2 {
        return (band_min, band_max, (band_max - band_min) / 255.0);
    }
    let bin_value =
        |i: usize| band_min + i as f64 * (band_max - band_min) / (bins as f64 - 1.0);
    let p2 = total * 0.02;
    let p98 = total - p2;

    let mut vmin = band_min;
    let mut cumulative = 0.0;
    for (i, &count) in histogram.iter().enumerate() {
        if cumulative >= p2 {
            vmin = bin_value(i);
            break;
        }
        cumulative += count;
    }
    let mut vmax = band_max;
    let mut remaining = total;
    for (i, &count) in histogram.iter().enumerate().rev() {
        if remaining <= p98 {
            vmax = bin_value(i);
            break;
        }
        remaining -= count;
    }
    if vmax <= vmin {
        vmax = band_max;
        vmin = band_min;
    }
    (vmin, vmax, (vmax - vmin) / 255.0)
}

/// One color-map rule: a half-open value interval and its colors.
#[derive(Debug, Clone, Copy)]
struct ColorRule {
    min: f64,
    max: f64,
    from: (u8, u8, u8),
    to: (u8, u8, u8),
}

/// A color map compiled against one band's range, with a 256-slot
/// bucket table accelerating rule lookup.
#[derive(Debug, Clone)]
struct ColorTable {
    rules: Vec<ColorRule>,
    buckets: Vec<Vec<u16>>,
    interpolate: bool,
    default_color: (u8, u8, u8),
    min_value: f64,
    scale_factor: f64,
}

impl ColorTable {
    fn build(map: &ColorMap, band: &BandStatistics) -> Self {
        let mut entries = map.entries.clone();
        entries.sort_by(|a, b| a.value.total_cmp(&b.value));
        let mut rules = Vec::new();
        for pair in entries.windows(2) {
            rules.push(ColorRule {
                min: pair[0].value,
                max: pair[1].value,
                from: pair[0].color,
                to: if map.interpolate {
                    pair[1].color
                } else {
                    pair[0].color
                },
            });
        }
        if !map.interpolate {
            if let Some(last) = entries.last() {
                rules.push(ColorRule {
                    min: last.value,
                    max: f64::INFINITY,
                    from: last.color,
                    to: last.color,
                });
            }
        }
        let (band_min, band_max) = band_range(band);
        let scale_factor = (band_max - band_min) / 255.0;
        let mut buckets = vec![Vec::new(); 256];
        if scale_factor > 0.0 {
            for (index, rule) in rules.iter().enumerate() {
                let first = (((rule.min - band_min) / scale_factor).floor())
                    .clamp(0.0, 255.0) as usize;
                let last = (((rule.max - band_min) / scale_factor).ceil())
                    .clamp(0.0, 255.0) as usize;
                for bucket in buckets.iter_mut().take(last + 1).skip(first) {
                    bucket.push(index as u16);
                }
            }
        }
        Self {
            rules,
            buckets,
            interpolate: map.interpolate,
            default_color: map.default_color,
            min_value: band_min,
            scale_factor,
        }
    }

    fn rule_color(&self, rule: &ColorRule, value: f64) -> (u8, u8, u8) {
        if !self.interpolate {
            return rule.from;
        }
        let span = rule.max - rule.min;
        if span <= 0.0 {
            return rule.from;
        }
        let t = (value - rule.min) / span;
        let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t) as u8;
        (
            lerp(rule.from.0, rule.to.0),
            lerp(rule.from.1, rule.to.1),
            lerp(rule.from.2, rule.to.2),
        )
    }

    fn apply(&self, value: f64) -> (u8, u8, u8) {
        let bucket = if self.scale_factor > 0.0 {
            ((value - self.min_value) / self.scale_factor).clamp(0.0, 255.0) as usize
        } else {
            0
        };
        for &index in &self.buckets[bucket] {
            let rule = &self.rules[index as usize];
            if rule.min <= value && value < rule.max {
                return self.rule_color(rule, value);
            }
        }
        // Values outside the band range can miss their bucket.
        for rule in &self.rules {
            if rule.min <= value && value < rule.max {
                return self.rule_color(rule, value);
            }
        }
        self.default_color
    }
}

/// Clamp a selected band index into range, degrading invalid
/// selections to band 0.
fn select_band(raster: &Raster, band: u8) -> u8 {
    if band < raster.bands() {
        band
    } else {
        warn!(
            "band {band} out of range for {}-band raster, using band 0",
            raster.bands()
        );
        0
    }
}

fn check_triple_band_input(raster: &Raster) -> RastileResult<()> {
    match raster.sample_type() {
        SampleType::UInt8 | SampleType::UInt16 => Ok(()),
        other => Err(RastileError::invalid(format!(
            "triple-band input must be uint8 or uint16, got {}",
            other.label()
        ))),
    }
}

/// The output transparency mask for a styled raster, if the input
/// tracks transparency at all.
fn output_mask(raster: &Raster) -> Option<Vec<u8>> {
    if raster.mask().is_none() && raster.no_data().is_none() {
        return None;
    }
    let mut mask = vec![1u8; raster.width() as usize * raster.height() as usize];
    for row in 0..raster.height() {
        for col in 0..raster.width() {
            if raster.is_transparent(row, col) {
                mask[row as usize * raster.width() as usize + col as usize] = 0;
            }
        }
    }
    Some(mask)
}

/// Apply a triple-band false-color selection, producing uint8 RGB.
pub fn apply_triple_band(
    raster: &Raster,
    stats: &RasterStatistics,
    symbolizer: &TripleBandSymbolizer,
) -> RastileResult<Raster> {
    check_triple_band_input(raster)?;
    let bands = [
        select_band(raster, symbolizer.red_band),
        select_band(raster, symbolizer.green_band),
        select_band(raster, symbolizer.blue_band),
    ];
    let contrasts = [
        symbolizer.red_contrast,
        symbolizer.green_contrast,
        symbolizer.blue_contrast,
    ];
    let luts: Vec<BandLut> = bands
        .iter()
        .zip(contrasts)
        .map(|(&band, kind)| Ok(BandLut::build(kind, stats.band(band)?)))
        .collect::<RastileResult<_>>()?;

    let width = raster.width();
    let height = raster.height();
    let mut data = vec![0u8; width as usize * height as usize * 3];
    for row in 0..height {
        for col in 0..width {
            let base = (row as usize * width as usize + col as usize) * 3;
            for channel in 0..3 {
                let value = raster.sample_f64(row, col, bands[channel]);
                data[base + channel] = luts[channel].apply(value);
            }
        }
    }
    let out = Raster::new(width, height, SampleType::UInt8, PixelType::Rgb, 3, data, None)?;
    match output_mask(raster) {
        Some(mask) => out.with_mask(mask),
        None => Ok(out),
    }
}

/// Apply a mono-band selection, producing uint8 grayscale or — with a
/// color map — uint8 RGB.
pub fn apply_mono_band(
    raster: &Raster,
    stats: &RasterStatistics,
    symbolizer: &MonoBandSymbolizer,
) -> RastileResult<Raster> {
    let band = select_band(raster, symbolizer.band);
    let band_stats = stats.band(band)?;
    let width = raster.width();
    let height = raster.height();

    let out = match &symbolizer.color_map {
        Some(map) if !map.entries.is_empty() => {
            let table = ColorTable::build(map, band_stats);
            let mut data = vec![0u8; width as usize * height as usize * 3];
            for row in 0..height {
                for col in 0..width {
                    let value = raster.sample_f64(row, col, band);
                    let (r, g, b) = table.apply(value);
                    let base = (row as usize * width as usize + col as usize) * 3;
                    data[base] = r;
                    data[base + 1] = g;
                    data[base + 2] = b;
                }
            }
            Raster::new(width, height, SampleType::UInt8, PixelType::Rgb, 3, data, None)?
        }
        other => {
            if other.is_some() {
                // An empty color map degrades to grayscale output.
                warn!("empty color map, producing grayscale");
            }
            let lut = BandLut::build(symbolizer.contrast, band_stats);
            let mut data = vec![0u8; width as usize * height as usize];
            for row in 0..height {
                for col in 0..width {
                    let value = raster.sample_f64(row, col, band);
                    data[row as usize * width as usize + col as usize] = lut.apply(value);
                }
            }
            Raster::new(
                width,
                height,
                SampleType::UInt8,
                PixelType::Grayscale,
                1,
                data,
                None,
            )?
        }
    };
    match output_mask(raster) {
        Some(mask) => out.with_mask(mask),
        None => Ok(out),
    }
}

/// Apply any symbolizer mode to a rendered raster.
pub fn apply_symbolizer(
    raster: &Raster,
    stats: &RasterStatistics,
    symbolizer: &RasterSymbolizer,
) -> RastileResult<Raster> {
    match symbolizer {
        RasterSymbolizer::RawCopy => Ok(raster.clone()),
        RasterSymbolizer::TripleBand(triple) => apply_triple_band(raster, stats, triple),
        RasterSymbolizer::MonoBand(mono) => apply_mono_band(raster, stats, mono),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(values: &[u8], width: u16, height: u16) -> Raster {
        Raster::new(
            width,
            height,
            SampleType::UInt8,
            PixelType::Grayscale,
            1,
            values.to_vec(),
            None,
        )
        .unwrap()
    }

    fn stats_for(raster: &Raster) -> RasterStatistics {
        let mut stats = RasterStatistics::new(raster.sample_type(), raster.bands()).unwrap();
        stats.update(raster);
        stats
    }

    #[test]
    fn gamma_two_matches_expected_curve() {
        let raster = gray(&[0, 64, 128, 192, 255, 0], 3, 2);
        let stats = stats_for(&raster);
        let symbolizer = MonoBandSymbolizer {
            band: 0,
            contrast: ContrastEnhancement::Gamma(2.0),
            color_map: None,
        };
        let out = apply_mono_band(&raster, &stats, &symbolizer).unwrap();
        let expected = [0u8, 128, 181, 221, 255];
        for (i, &want) in expected.iter().enumerate() {
            let got = out.data()[i];
            assert!(
                got.abs_diff(want) <= 1,
                "gamma({}) = {got}, expected about {want}",
                raster.data()[i]
            );
        }
    }

    #[test]
    fn identity_for_byte_ranged_band() {
        let raster = gray(&[0, 10, 100, 250], 2, 2);
        let stats = stats_for(&raster);
        let symbolizer = MonoBandSymbolizer {
            band: 0,
            contrast: ContrastEnhancement::None,
            color_map: None,
        };
        let out = apply_mono_band(&raster, &stats, &symbolizer).unwrap();
        assert_eq!(out.data(), raster.data());
    }

    #[test]
    fn normalize_stretches_toward_full_range() {
        // 100 pixels concentrated in 100..=199.
        let values: Vec<u8> = (0..100u16).map(|i| 100 + (i % 100) as u8).collect();
        let raster = gray(&values, 10, 10);
        let stats = stats_for(&raster);
        let symbolizer = MonoBandSymbolizer {
            band: 0,
            contrast: ContrastEnhancement::Normalize,
            color_map: None,
        };
        let out = apply_mono_band(&raster, &stats, &symbolizer).unwrap();
        let min = *out.data().iter().min().unwrap();
        let max = *out.data().iter().max().unwrap();
        assert_eq!(min, 0);
        assert!(max >= 250);
    }

    #[test]
    fn categorize_steps() {
        let raster = gray(&[5, 15, 25, 35], 2, 2);
        let stats = stats_for(&raster);
        let symbolizer = MonoBandSymbolizer {
            band: 0,
            contrast: ContrastEnhancement::None,
            color_map: Some(ColorMap {
                interpolate: false,
                default_color: (9, 9, 9),
                entries: vec![
                    ColorMapEntry {
                        value: 10.0,
                        color: (255, 0, 0),
                    },
                    ColorMapEntry {
                        value: 30.0,
                        color: (0, 255, 0),
                    },
                ],
            }),
        };
        let out = apply_mono_band(&raster, &stats, &symbolizer).unwrap();
        assert_eq!(&out.data()[0..3], &[9, 9, 9]); // below first stop
        assert_eq!(&out.data()[3..6], &[255, 0, 0]); // in [10, 30)
        assert_eq!(&out.data()[6..9], &[255, 0, 0]);
        assert_eq!(&out.data()[9..12], &[0, 255, 0]); // past last stop
    }

    #[test]
    fn interpolate_midpoint() {
        let raster = gray(&[0, 50, 100, 100], 2, 2);
        let stats = stats_for(&raster);
        let symbolizer = MonoBandSymbolizer {
            band: 0,
            contrast: ContrastEnhancement::None,
            color_map: Some(ColorMap {
                interpolate: true,
                default_color: (0, 0, 0),
                entries: vec![
                    ColorMapEntry {
                        value: 0.0,
                        color: (0, 0, 0),
                    },
                    ColorMapEntry {
                        value: 100.0,
                        color: (200, 100, 0),
                    },
                ],
            }),
        };
        let out = apply_mono_band(&raster, &stats, &symbolizer).unwrap();
        // Value 50 lands halfway between the stops.
        assert_eq!(&out.data()[3..6], &[100, 50, 0]);
    }

    #[test]
    fn triple_band_false_color() {
        let mut data = Vec::new();
        for i in 0..16u16 {
            data.extend_from_slice(&(i * 100).to_ne_bytes()); // band 0
            data.extend_from_slice(&(i * 10).to_ne_bytes()); // band 1
            data.extend_from_slice(&i.to_ne_bytes()); // band 2
        }
        let raster = Raster::new(
            4,
            4,
            SampleType::UInt16,
            PixelType::MultiBand,
            3,
            data,
            None,
        )
        .unwrap();
        let stats = stats_for(&raster);
        let symbolizer = TripleBandSymbolizer {
            red_band: 2,
            green_band: 1,
            blue_band: 0,
            red_contrast: ContrastEnhancement::None,
            green_contrast: ContrastEnhancement::None,
            blue_contrast: ContrastEnhancement::None,
        };
        let out = apply_triple_band(&raster, &stats, &symbolizer).unwrap();
        assert_eq!(out.pixel_type(), PixelType::Rgb);
        assert_eq!(out.sample_type(), SampleType::UInt8);
        // Band 2 fits 0..=255, band 0 is rescaled from 0..=1500.
        assert_eq!(out.data()[0], 0);
        let last = &out.data()[15 * 3..];
        assert_eq!(last[0], 15);
        assert_eq!(last[2], 255);
    }

    #[test]
    fn data_grid_color_map() {
        let mut data = Vec::new();
        for value in [100.0f32, 900.0, 1500.0, 2500.0] {
            data.extend_from_slice(&value.to_ne_bytes());
        }
        let raster = Raster::new(
            2,
            2,
            SampleType::Float32,
            PixelType::DataGrid,
            1,
            data,
            None,
        )
        .unwrap();
        let stats = stats_for(&raster);
        let symbolizer = MonoBandSymbolizer {
            band: 0,
            contrast: ContrastEnhancement::None,
            color_map: Some(ColorMap {
                interpolate: false,
                default_color: (0, 0, 128),
                entries: vec![
                    ColorMapEntry {
                        value: 500.0,
                        color: (0, 128, 0),
                    },
                    ColorMapEntry {
                        value: 2000.0,
                        color: (128, 64, 0),
                    },
                ],
            }),
        };
        let out = apply_mono_band(&raster, &stats, &symbolizer).unwrap();
        assert_eq!(&out.data()[0..3], &[0, 0, 128]); // below the sea-level stop
        assert_eq!(&out.data()[3..6], &[0, 128, 0]);
        assert_eq!(&out.data()[9..12], &[128, 64, 0]);
    }

    #[test]
    fn invalid_band_degrades_to_band_zero() {
        let raster = gray(&[1, 2, 3, 4], 2, 2);
        let stats = stats_for(&raster);
        let symbolizer = MonoBandSymbolizer {
            band: 7,
            contrast: ContrastEnhancement::None,
            color_map: None,
        };
        let out = apply_mono_band(&raster, &stats, &symbolizer).unwrap();
        assert_eq!(out.data(), raster.data());
    }

    #[test]
    fn transparency_propagates() {
        let raster = gray(&[1, 2, 3, 4], 2, 2)
            .with_mask(vec![1, 0, 1, 1])
            .unwrap();
        let stats = stats_for(&raster);
        let symbolizer = MonoBandSymbolizer {
            band: 0,
            contrast: ContrastEnhancement::None,
            color_map: None,
        };
        let out = apply_mono_band(&raster, &stats, &symbolizer).unwrap();
        assert_eq!(out.mask().unwrap(), &[1, 0, 1, 1]);
    }
}
