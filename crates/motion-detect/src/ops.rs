//! Pixel operations on the downscaled motion frame

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::prelude::*;

/// One connected white region of the binary motion mask, with its bounding
/// box in mask coordinates and its pixel-count area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x1: usize,
    pub y1: usize,
    pub x2: usize,
    pub y2: usize,
    pub area: usize,
}

/// Downscales the luminance plane to the motion shape and applies a
/// gaussian blur.
pub fn downscale_blur(
    luma: &[u8],
    src_h: usize,
    src_w: usize,
    out_h: usize,
    out_w: usize,
    blur_sigma: f32,
    filter: FilterType,
) -> Array2<f32> {
    let src = GrayImage::from_raw(src_w as u32, src_h as u32, luma.to_vec())
        .expect("luma slice matches the declared shape");
    let resized = imageops::resize(&src, out_w as u32, out_h as u32, filter);
    let blurred = imageops::blur(&resized, blur_sigma);
    Array2::from_shape_vec(
        (out_h, out_w),
        blurred.into_raw().into_iter().map(f32::from).collect(),
    )
    .expect("resize output matches the motion shape")
}

/// `|frame - |avg||`, elementwise.
pub fn abs_diff(frame: &Array2<f32>, avg: &Array2<f32>) -> Array2<f32> {
    let mut delta = frame.clone();
    azip!((d in &mut delta, &a in avg) *d = (*d - a.abs()).abs());
    delta
}

/// Binary threshold: delta above `threshold` becomes 255.
pub fn threshold_mask(delta: &Array2<f32>, threshold: u8) -> Array2<u8> {
    delta.map(|&d| if d > threshold as f32 { 255 } else { 0 })
}

/// One pass of 3x3 dilation over a binary mask.
pub fn dilate3x3(mask: &Array2<u8>) -> Array2<u8> {
    let (h, w) = mask.dim();
    let mut out = Array2::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            if mask[(y, x)] == 0 {
                continue;
            }
            let y0 = y.saturating_sub(1);
            let x0 = x.saturating_sub(1);
            let y1 = (y + 1).min(h - 1);
            let x1 = (x + 1).min(w - 1);
            for ny in y0..=y1 {
                for nx in x0..=x1 {
                    out[(ny, nx)] = 255;
                }
            }
        }
    }
    out
}

/// Extracts the external connected regions (8-connectivity) of a binary
/// mask, each with its bounding box and pixel area.
pub fn connected_regions(mask: &Array2<u8>) -> Vec<Region> {
    let (h, w) = mask.dim();
    let mut visited = Array2::<u8>::zeros((h, w));
    let mut regions = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if mask[(y, x)] == 0 || visited[(y, x)] != 0 {
                continue;
            }

            let mut region = Region {
                x1: x,
                y1: y,
                x2: x,
                y2: y,
                area: 0,
            };
            visited[(y, x)] = 1;
            stack.push((y, x));

            while let Some((cy, cx)) = stack.pop() {
                region.area += 1;
                region.x1 = region.x1.min(cx);
                region.y1 = region.y1.min(cy);
                region.x2 = region.x2.max(cx);
                region.y2 = region.y2.max(cy);

                let y0 = cy.saturating_sub(1);
                let x0 = cx.saturating_sub(1);
                let y1 = (cy + 1).min(h - 1);
                let x1 = (cx + 1).min(w - 1);
                for ny in y0..=y1 {
                    for nx in x0..=x1 {
                        if mask[(ny, nx)] != 0 && visited[(ny, nx)] == 0 {
                            visited[(ny, nx)] = 1;
                            stack.push((ny, nx));
                        }
                    }
                }
            }

            regions.push(region);
        }
    }

    regions
}

/// Running average update: `avg = (1 - alpha) * avg + alpha * frame`.
pub fn accumulate_weighted(avg: &mut Array2<f32>, frame: &Array2<f32>, alpha: f32) {
    azip!((a in avg, &f in frame) *a = (1.0 - alpha) * *a + alpha * f);
}
