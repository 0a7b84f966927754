//! Pyramid level bookkeeping and the resolution chooser.

use crate::codec::Scale;
use crate::coverage::Coverage;
use crate::error::{RastileError, RastileResult};

/// The four resolution pairs persisted for one pyramid level: the
/// level's own resolution and its 1:2, 1:4, 1:8 derivations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidLevel {
    /// The pyramid level; higher is coarser.
    pub level: u32,
    /// (x, y) resolution at each scale 1:1, 1:2, 1:4, 1:8.
    pub resolutions: [(f64, f64); 4],
}

impl PyramidLevel {
    /// The level row derived from a coverage's base resolution.
    pub fn for_coverage(coverage: &Coverage, level: u32) -> Self {
        let (x_res, y_res) = coverage.level_resolution(level);
        Self::from_base(level, x_res, y_res)
    }

    /// Build a level row from its 1:1 resolution.
    pub fn from_base(level: u32, x_res: f64, y_res: f64) -> Self {
        Self {
            level,
            resolutions: [
                (x_res, y_res),
                (x_res * 2.0, y_res * 2.0),
                (x_res * 4.0, y_res * 4.0),
                (x_res * 8.0, y_res * 8.0),
            ],
        }
    }
}

/// The outcome of a resolution match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionMatch {
    /// The chosen pyramid level.
    pub level: u32,
    /// The decode scale to apply to that level's tiles.
    pub scale: Scale,
    /// The stored horizontal resolution actually matched.
    pub x_res: f64,
    /// The stored vertical resolution actually matched.
    pub y_res: f64,
}

/// Match a requested resolution against the persisted levels.
///
/// Each stored (level, scale) pair matches when the request falls
/// within 1% of the stored x and y resolutions respectively. Among
/// multiple matches the finest level wins, and within a level the
/// finest scale.
pub fn find_matching_resolution(
    levels: &[PyramidLevel],
    x_req: f64,
    y_req: f64,
) -> RastileResult<ResolutionMatch> {
    let mut best: Option<ResolutionMatch> = None;
    for level in levels {
        for (slot, &(x_res, y_res)) in level.resolutions.iter().enumerate() {
            let x_confidence = x_res / 100.0;
            let y_confidence = y_res / 100.0;
            if x_req < x_res - x_confidence || x_req > x_res + x_confidence {
                continue;
            }
            if y_req < y_res - y_confidence || y_req > y_res + y_confidence {
                continue;
            }
            let candidate = ResolutionMatch {
                level: level.level,
                scale: Scale::from_factor(1 << slot)?,
                x_res,
                y_res,
            };
            let better = match &best {
                None => true,
                Some(current) => {
                    (candidate.level, candidate.scale.factor())
                        < (current.level, current.scale.factor())
                }
            };
            if better {
                best = Some(candidate);
            }
        }
    }
    best.ok_or(RastileError::NoMatchingResolution {
        x_res: x_req,
        y_res: y_req,
    })
}
