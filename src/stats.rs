//! The statistics engine: running per-band statistics with pooled
//! variance aggregation and 256-bin histograms.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::codec::markers;
use crate::error::{RastileError, RastileResult};
use crate::pixel::SampleType;
use crate::raster::Raster;

/// One pooled-variance contribution from a merged source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PooledVariance {
    /// Sample count of the merged source.
    pub count: f64,
    /// Variance of the merged source, `sum_sq_diff / (n - 1)`.
    pub variance: f64,
}

/// Running statistics for one band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandStatistics {
    min: f64,
    max: f64,
    mean: f64,
    sum_sq_diff: f64,
    histogram: Vec<f64>,
    pooled: Vec<PooledVariance>,
}

impl BandStatistics {
    fn new(bins: usize) -> Self {
        Self {
            min: f64::MAX,
            max: -f64::MAX,
            mean: 0.0,
            sum_sq_diff: 0.0,
            histogram: vec![0.0; bins],
            pooled: Vec::new(),
        }
    }

    /// Smallest observed value.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Largest observed value.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Running mean.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Running sum of squared differences from the mean.
    pub fn sum_sq_diff(&self) -> f64 {
        self.sum_sq_diff
    }

    /// The histogram bins.
    ///
    /// Bins are updated for 1/2/4-bit, uint8 and int8 samples only;
    /// for wider sample types the bins are allocated but stay zero.
    pub fn histogram(&self) -> &[f64] {
        &self.histogram
    }

    /// The pooled-variance contributions accumulated by merges.
    pub fn pooled(&self) -> &[PooledVariance] {
        &self.pooled
    }

    /// The reported band variance: the pooled variance over all
    /// merged contributions when any exist, else
    /// `sum_sq_diff / (count - 1)`.
    pub fn variance(&self, count: f64) -> f64 {
        if self.pooled.is_empty() {
            if count > 1.0 {
                self.sum_sq_diff / (count - 1.0)
            } else {
                0.0
            }
        } else {
            let mut weighted = 0.0;
            let mut total = 0.0;
            for pool in &self.pooled {
                weighted += (pool.count - 1.0) * pool.variance;
                total += pool.count - 1.0;
            }
            if total > 0.0 {
                weighted / total
            } else {
                0.0
            }
        }
    }
}

/// Running statistics for every band of a coverage.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterStatistics {
    sample_type: SampleType,
    bands: u8,
    no_data: f64,
    count: f64,
    band_stats: Vec<BandStatistics>,
}

/// Histogram bin count for a sample type.
fn histogram_bins(sample_type: SampleType) -> usize {
    match sample_type {
        SampleType::OneBit => 2,
        SampleType::TwoBit => 4,
        SampleType::FourBit => 16,
        _ => 256,
    }
}

impl RasterStatistics {
    /// Create empty statistics for the given shape.
    pub fn new(sample_type: SampleType, bands: u8) -> RastileResult<Self> {
        if bands == 0 {
            return Err(RastileError::invalid("statistics require at least one band"));
        }
        let bins = histogram_bins(sample_type);
        Ok(Self {
            sample_type,
            bands,
            no_data: 0.0,
            count: 0.0,
            band_stats: (0..bands).map(|_| BandStatistics::new(bins)).collect(),
        })
    }

    /// The sample type these statistics describe.
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    /// Number of bands.
    pub fn bands(&self) -> u8 {
        self.bands
    }

    /// Count of pixels skipped as transparent or NoData.
    pub fn no_data_count(&self) -> f64 {
        self.no_data
    }

    /// Count of sampled pixels.
    pub fn count(&self) -> f64 {
        self.count
    }

    /// Statistics for one band.
    pub fn band(&self, band: u8) -> RastileResult<&BandStatistics> {
        self.band_stats
            .get(band as usize)
            .ok_or_else(|| RastileError::invalid(format!("band {band} out of range")))
    }

    /// Feed every pixel of a raster into the running statistics.
    ///
    /// Pixels masked transparent or equal to the raster's NoData value
    /// are counted as no-data and otherwise skipped. Never fails.
    pub fn update(&mut self, raster: &Raster) {
        if raster.sample_type() != self.sample_type || raster.bands() != self.bands {
            return;
        }
        for row in 0..raster.height() {
            for col in 0..raster.width() {
                if raster.is_transparent(row, col) {
                    self.no_data += 1.0;
                    continue;
                }
                self.count += 1.0;
                for band in 0..self.bands {
                    let value = raster.sample_f64(row, col, band);
                    self.update_band(band, value);
                }
            }
        }
    }

    /// One Welford step for a band; `self.count` already includes the
    /// pixel being added.
    fn update_band(&mut self, band: u8, value: f64) {
        let n = self.count;
        let band_stats = &mut self.band_stats[band as usize];
        if value < band_stats.min {
            band_stats.min = value;
        }
        if value > band_stats.max {
            band_stats.max = value;
        }
        let delta = value - band_stats.mean;
        band_stats.sum_sq_diff += ((n - 1.0) * delta * delta) / n;
        band_stats.mean += delta / n;
        let bin = match self.sample_type {
            SampleType::Int8 => Some(value as i32 + 128),
            SampleType::OneBit | SampleType::TwoBit | SampleType::FourBit | SampleType::UInt8 => {
                Some(value as i32)
            }
            _ => None,
        };
        if let Some(bin) = bin {
            if let Some(slot) = band_stats.histogram.get_mut(bin as usize) {
                *slot += 1.0;
            }
        }
    }

    /// Merge another statistics object into this one, appending one
    /// pooled-variance record per band and summing histograms.
    pub fn merge(&mut self, other: &RasterStatistics) -> RastileResult<()> {
        if other.sample_type != self.sample_type || other.bands != self.bands {
            return Err(RastileError::invalid(
                "cannot merge statistics of a different shape",
            ));
        }
        if other.count == 0.0 {
            self.no_data += other.no_data;
            return Ok(());
        }
        let first = self.count == 0.0;
        self.no_data += other.no_data;
        for band in 0..self.bands as usize {
            let incoming = &other.band_stats[band];
            let target = &mut self.band_stats[band];
            if first {
                target.min = incoming.min;
                target.max = incoming.max;
                target.mean = incoming.mean;
            } else {
                target.min = target.min.min(incoming.min);
                target.max = target.max.max(incoming.max);
                target.mean = (target.mean * self.count + incoming.mean * other.count)
                    / (self.count + other.count);
            }
            target.pooled.push(PooledVariance {
                count: other.count,
                variance: incoming.sum_sq_diff / (other.count - 1.0),
            });
            for (slot, value) in target.histogram.iter_mut().zip(&incoming.histogram) {
                *slot += value;
            }
        }
        self.count += other.count;
        Ok(())
    }

    /// Serialize to the DBMS blob form (CRC-framed, little-endian).
    pub fn serialize(&self) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.push(0x00);
        blob.push(markers::STATS_START);
        blob.push(markers::LITTLE_ENDIAN);
        blob.push(self.sample_type.into());
        blob.push(self.bands);
        push_f64(&mut blob, self.no_data);
        push_f64(&mut blob, self.count);
        for band in &self.band_stats {
            blob.push(markers::BAND_STATS_START);
            push_f64(&mut blob, band.min);
            push_f64(&mut blob, band.max);
            push_f64(&mut blob, band.mean);
            push_f64(&mut blob, band.sum_sq_diff);
            let mut word = [0u8; 2];
            LittleEndian::write_u16(&mut word, band.histogram.len() as u16);
            blob.extend_from_slice(&word);
            blob.push(markers::HISTOGRAM_START);
            for value in &band.histogram {
                push_f64(&mut blob, *value);
            }
            blob.push(markers::HISTOGRAM_END);
            blob.push(markers::BAND_STATS_END);
        }
        let crc = crc32fast::hash(&blob);
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, crc);
        blob.extend_from_slice(&word);
        blob.push(markers::STATS_END);
        blob
    }

    /// Deserialize from the DBMS blob form, validating framing and CRC.
    pub fn deserialize(blob: &[u8]) -> RastileResult<Self> {
        let corrupt = |msg: &str| RastileError::corrupt(format!("statistics blob: {msg}"));
        if blob.len() < 27 {
            return Err(corrupt("too short"));
        }
        if blob[0] != 0x00 || blob[1] != markers::STATS_START {
            return Err(corrupt("start signature"));
        }
        let little = match blob[2] {
            markers::LITTLE_ENDIAN => true,
            markers::BIG_ENDIAN => false,
            _ => return Err(corrupt("endian marker")),
        };
        let sample_type =
            SampleType::try_from(blob[3]).map_err(|_| corrupt("sample type code"))?;
        let bands = blob[4];
        if bands == 0 {
            return Err(corrupt("zero bands"));
        }
        let read_f64 = |buf: &[u8]| {
            if little {
                LittleEndian::read_f64(buf)
            } else {
                BigEndian::read_f64(buf)
            }
        };
        let no_data = read_f64(&blob[5..13]);
        let count = read_f64(&blob[13..21]);
        let mut offset = 21;
        let mut band_stats = Vec::with_capacity(bands as usize);
        for _ in 0..bands {
            if offset + 38 > blob.len() {
                return Err(corrupt("truncated band"));
            }
            if blob[offset] != markers::BAND_STATS_START {
                return Err(corrupt("band start marker"));
            }
            offset += 1;
            let min = read_f64(&blob[offset..offset + 8]);
            let max = read_f64(&blob[offset + 8..offset + 16]);
            let mean = read_f64(&blob[offset + 16..offset + 24]);
            let sum_sq_diff = read_f64(&blob[offset + 24..offset + 32]);
            offset += 32;
            let n_histogram = if little {
                LittleEndian::read_u16(&blob[offset..offset + 2])
            } else {
                BigEndian::read_u16(&blob[offset..offset + 2])
            } as usize;
            offset += 2;
            if blob[offset] != markers::HISTOGRAM_START {
                return Err(corrupt("histogram start marker"));
            }
            offset += 1;
            if offset + n_histogram * 8 + 2 > blob.len() {
                return Err(corrupt("truncated histogram"));
            }
            let mut histogram = Vec::with_capacity(n_histogram);
            for _ in 0..n_histogram {
                histogram.push(read_f64(&blob[offset..offset + 8]));
                offset += 8;
            }
            if blob[offset] != markers::HISTOGRAM_END {
                return Err(corrupt("histogram end marker"));
            }
            if blob[offset + 1] != markers::BAND_STATS_END {
                return Err(corrupt("band end marker"));
            }
            offset += 2;
            band_stats.push(BandStatistics {
                min,
                max,
                mean,
                sum_sq_diff,
                histogram,
                pooled: Vec::new(),
            });
        }
        if offset + 5 != blob.len() {
            return Err(corrupt("size mismatch"));
        }
        let crc = crc32fast::hash(&blob[..offset]);
        let stored = if little {
            LittleEndian::read_u32(&blob[offset..offset + 4])
        } else {
            BigEndian::read_u32(&blob[offset..offset + 4])
        };
        if crc != stored {
            return Err(corrupt("CRC mismatch"));
        }
        if blob[offset + 4] != markers::STATS_END {
            return Err(corrupt("end signature"));
        }
        Ok(Self {
            sample_type,
            bands,
            no_data,
            count,
            band_stats,
        })
    }
}

fn push_f64(blob: &mut Vec<u8>, value: f64) {
    let mut word = [0u8; 8];
    LittleEndian::write_f64(&mut word, value);
    blob.extend_from_slice(&word);
}
