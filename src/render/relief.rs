//! Shaded relief: per-cell hillshade from a 3x3 neighborhood of an
//! elevation grid using Horn's formula.

use std::f64::consts::PI;

/// Default sun altitude in degrees.
pub const DEFAULT_ALTITUDE: f64 = 45.0;
/// Default sun azimuth in degrees.
pub const DEFAULT_AZIMUTH: f64 = 315.0;

/// The marker emitted when any cell of the 3x3 window is NoData.
pub const RELIEF_NO_DATA: f32 = -1.0;

/// Compute the shade for one 3x3 window, row-major from the
/// north-west corner.
fn shade_window(
    window: &[f64; 9],
    relief_factor: f64,
    scale_factor: f64,
    alt_radians: f64,
    az_radians: f64,
) -> f32 {
    let z_factor = 0.003_333_333_3 * (relief_factor / 55.0);
    let x = z_factor
        * ((window[0] + window[3] + window[3] + window[6])
            - (window[2] + window[5] + window[5] + window[8]))
        / scale_factor;
    let y = z_factor
        * ((window[6] + window[7] + window[7] + window[8])
            - (window[0] + window[1] + window[1] + window[2]))
        / scale_factor;
    let slope = PI / 2.0 - (x * x + y * y).sqrt().atan();
    let aspect = x.atan2(y);
    let value = alt_radians.sin() * slope.sin()
        + alt_radians.cos() * slope.cos() * (az_radians - PI / 2.0 - aspect).cos();
    value.clamp(0.0, 1.0) as f32
}

/// Compute a `width * height` shade mask from a padded elevation
/// grid.
///
/// `grid` holds `(width + 2) * (height + 2)` samples: the interior
/// cells plus a one-cell NoData apron on every edge. A window that
/// touches any sample equal to `no_data` yields [`RELIEF_NO_DATA`].
pub fn shaded_relief(
    grid: &[f64],
    width: usize,
    height: usize,
    no_data: f64,
    relief_factor: f64,
    scale_factor: f64,
) -> Vec<f32> {
    shaded_relief_with_sun(
        grid,
        width,
        height,
        no_data,
        relief_factor,
        scale_factor,
        DEFAULT_ALTITUDE,
        DEFAULT_AZIMUTH,
    )
}

/// [`shaded_relief`] with explicit sun altitude and azimuth in
/// degrees.
#[allow(clippy::too_many_arguments)]
pub fn shaded_relief_with_sun(
    grid: &[f64],
    width: usize,
    height: usize,
    no_data: f64,
    relief_factor: f64,
    scale_factor: f64,
    altitude_deg: f64,
    azimuth_deg: f64,
) -> Vec<f32> {
    let stride = width + 2;
    debug_assert_eq!(grid.len(), stride * (height + 2));
    let alt_radians = altitude_deg.to_radians();
    let az_radians = azimuth_deg.to_radians();
    let mut out = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let mut window = [0.0f64; 9];
            let mut has_no_data = false;
            for (i, slot) in window.iter_mut().enumerate() {
                let value = grid[(row + i / 3) * stride + col + i % 3];
                if value == no_data {
                    has_no_data = true;
                }
                *slot = value;
            }
            if has_no_data {
                out.push(RELIEF_NO_DATA);
            } else {
                out.push(shade_window(
                    &window,
                    relief_factor,
                    scale_factor,
                    alt_radians,
                    az_radians,
                ));
            }
        }
    }
    out
}
