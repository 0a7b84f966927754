//! Copies decoded tiles into an output raster buffer by geographic
//! position.

use crate::raster::Raster;

/// Blit one decoded tile into the destination raster.
///
/// Every tile pixel is mapped through its geographic center into a
/// destination index; pixels that fall outside are skipped. Pixels
/// masked transparent on the tile, or equal to the tile's NoData
/// value, leave the destination untouched so its NoData priming (or a
/// previously blitted tile) shows through.
///
/// Both buffers hold host-order samples of the same shape, so the
/// copy is a pixel-stride byte move with no per-pixel dispatch.
pub(crate) fn blit_tile(
    tile: &Raster,
    out: &mut Raster,
    x_res: f64,
    y_res: f64,
    min_x: f64,
    max_y: f64,
    tile_min_x: f64,
    tile_max_y: f64,
) {
    debug_assert_eq!(tile.sample_type(), out.sample_type());
    debug_assert_eq!(tile.bands(), out.bands());

    let stride = tile.pixel_stride();
    let out_width = out.width() as usize;
    let out_height = out.height() as usize;
    let tile_width = tile.width() as usize;

    for y in 0..tile.height() {
        let geo_y = tile_max_y - (y as f64 + 0.5) * y_res;
        let out_y = ((max_y - geo_y) / y_res).floor() as i64;
        if out_y < 0 || out_y >= out_height as i64 {
            continue;
        }
        for x in 0..tile.width() {
            let geo_x = tile_min_x + (x as f64 + 0.5) * x_res;
            let out_x = ((geo_x - min_x) / x_res).floor() as i64;
            if out_x < 0 || out_x >= out_width as i64 {
                continue;
            }
            if tile.is_transparent(y, x) {
                continue;
            }
            let src = (y as usize * tile_width + x as usize) * stride;
            let dst = (out_y as usize * out_width + out_x as usize) * stride;
            let pixel = &tile.data()[src..src + stride];
            out.data_mut()[dst..dst + stride].copy_from_slice(pixel);
            if let Some(mask) = out.mask_mut() {
                mask[out_y as usize * out_width + out_x as usize] = 1;
            }
        }
    }
}
