use crate::model::Rect;
use crate::source::SourceImage;
use image::{Rgba, RgbaImage};

/// Copy `region` of `src` into `canvas` with its top-left at (dx, dy), expanding RGB to RGBA,
/// then optionally draw a red 1px outline around the copied area for debugging.
///
/// Pixels falling outside either image are skipped; callers validate bounds beforehand.
pub fn blit_source(
    src: &SourceImage,
    region: &Rect,
    canvas: &mut RgbaImage,
    dx: u32,
    dy: u32,
    outlines: bool,
) {
    let (cw, ch) = canvas.dimensions();
    for yy in 0..region.h {
        let (sy, ty) = (region.y + yy, dy + yy);
        if sy >= src.height() || ty >= ch {
            break;
        }
        for xx in 0..region.w {
            let (sx, tx) = (region.x + xx, dx + xx);
            if sx >= src.width() || tx >= cw {
                break;
            }
            canvas.put_pixel(tx, ty, Rgba(src.rgba_at(sx, sy)));
        }
    }

    if outlines && !region.is_empty() {
        let red = Rgba([255, 0, 0, 255]);
        let (rw, rh) = (region.w, region.h);
        for xx in 0..rw {
            if dx + xx < cw && dy < ch {
                canvas.put_pixel(dx + xx, dy, red);
            }
            let by = dy + rh - 1;
            if dx + xx < cw && by < ch {
                canvas.put_pixel(dx + xx, by, red);
            }
        }
        for yy in 0..rh {
            if dx < cw && dy + yy < ch {
                canvas.put_pixel(dx, dy + yy, red);
            }
            let rx = dx + rw - 1;
            if rx < cw && dy + yy < ch {
                canvas.put_pixel(rx, dy + yy, red);
            }
        }
    }
}
