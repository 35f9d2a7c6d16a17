//! Median filtering of `f32` frames.
//!
//! `imageproc::filter::median_filter` only accepts 8-bit pixels, while EPID
//! counts need the full float range, so the window median is computed here.

use rayon::prelude::*;

use crate::image::GrayF32;

/// Apply a `size × size` median filter with clamp-to-edge borders.
///
/// Even sizes are rounded up to the next odd size; `size <= 1` is a copy.
pub fn median_filter(img: &GrayF32, size: usize) -> GrayF32 {
    let radius = size / 2;
    if radius == 0 {
        return img.clone();
    }
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    let src = img.as_raw();
    let mut out = vec![0.0f32; w * h];
    let window = (2 * radius + 1) * (2 * radius + 1);

    out.par_chunks_mut(w).enumerate().for_each(|(y, dst_row)| {
        let mut buf = Vec::with_capacity(window);
        for (x, dst) in dst_row.iter_mut().enumerate() {
            buf.clear();
            for dy in 0..=2 * radius {
                let ny = (y + dy).saturating_sub(radius).min(h - 1);
                let row = &src[ny * w..(ny + 1) * w];
                for dx in 0..=2 * radius {
                    let nx = (x + dx).saturating_sub(radius).min(w - 1);
                    buf.push(row[nx]);
                }
            }
            let mid = buf.len() / 2;
            let (_, m, _) = buf.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            *dst = *m;
        }
    });

    GrayF32::from_raw(w as u32, h as u32, out).expect("filter output matches input dimensions")
}
