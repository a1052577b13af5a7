//! Synthetic marker rendering.
//!
//! Used to produce printable marker sheets and synthetic frames for tests
//! and demos. Rendering is axis-aligned; perspective views are obtained by
//! warping the output or by projecting board geometry directly.

use crate::Dictionary;
use marker_track_core::GrayImage;

pub const WHITE: u8 = 255;
pub const BLACK: u8 = 0;

/// Render a single marker with its black border and a white quiet zone.
///
/// Output side length is `(marker_size + 2 * border_bits) * module_px
/// + 2 * margin_px`.
pub fn render_marker(
    dict: &Dictionary,
    id: u32,
    module_px: usize,
    border_bits: usize,
    margin_px: usize,
) -> Option<GrayImage> {
    let code = *dict.codes.get(id as usize)?;
    let n = dict.marker_size;
    let cells = n + 2 * border_bits;
    let side = cells * module_px + 2 * margin_px;

    let mut img = GrayImage::filled(side, side, WHITE);
    for cy in 0..cells {
        for cx in 0..cells {
            let black = if cx < border_bits
                || cy < border_bits
                || cx >= cells - border_bits
                || cy >= cells - border_bits
            {
                true
            } else {
                let bx = cx - border_bits;
                let by = cy - border_bits;
                ((code >> (by * n + bx)) & 1) == 1
            };
            if black {
                fill_rect(
                    &mut img,
                    margin_px + cx * module_px,
                    margin_px + cy * module_px,
                    module_px,
                    module_px,
                    BLACK,
                );
            }
        }
    }
    Some(img)
}

/// Copy `src` into `dst` with its top-left at `(x, y)`; clipped at borders.
pub fn paste(dst: &mut GrayImage, src: &GrayImage, x: usize, y: usize) {
    for sy in 0..src.height {
        let dy = y + sy;
        if dy >= dst.height {
            break;
        }
        for sx in 0..src.width {
            let dx = x + sx;
            if dx >= dst.width {
                break;
            }
            dst.data[dy * dst.width + dx] = src.data[sy * src.width + sx];
        }
    }
}

/// Rotate an image a quarter turn clockwise.
pub fn rotate90(src: &GrayImage) -> GrayImage {
    let mut out = GrayImage::filled(src.height, src.width, WHITE);
    for y in 0..src.height {
        for x in 0..src.width {
            let nx = src.height - 1 - y;
            let ny = x;
            out.data[ny * out.width + nx] = src.data[y * src.width + x];
        }
    }
    out
}

fn fill_rect(img: &mut GrayImage, x: usize, y: usize, w: usize, h: usize, value: u8) {
    for yy in y..(y + h).min(img.height) {
        for xx in x..(x + w).min(img.width) {
            img.data[yy * img.width + xx] = value;
        }
    }
}
