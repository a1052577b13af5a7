//! Thresholding utilities for marker detection and decoding.

use marker_track_core::GrayImageView;

/// Otsu threshold over a whole frame, subsampled with `stride` for speed.
pub fn otsu_threshold(img: &GrayImageView<'_>, stride: usize) -> u8 {
    let stride = stride.max(1);
    let mut hist = [0u32; 256];
    let mut total = 0u64;
    for y in (0..img.height).step_by(stride) {
        let row = &img.data[y * img.width..(y + 1) * img.width];
        for &v in row.iter().step_by(stride) {
            hist[v as usize] += 1;
            total += 1;
        }
    }
    otsu_from_histogram(&hist, total)
}

/// Otsu threshold from a small set of sampled intensities.
pub fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 127;
    }

    let mut min_v = 255u8;
    let mut max_v = 0u8;
    for &v in samples {
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    if min_v == max_v {
        return min_v;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }

    let nonzero_bins = hist.iter().filter(|&&h| h > 0).count();
    if nonzero_bins <= 2 {
        return ((min_v as u16 + max_v as u16) / 2) as u8;
    }

    otsu_from_histogram(&hist, samples.len() as u64)
}

/// Classic between-class variance maximization.
///
/// Returns the first foreground bin, so callers classify with `v < t`:
/// every value up to and including the best split bin reads as dark.
fn otsu_from_histogram(hist: &[u32; 256], total: u64) -> u8 {
    if total == 0 {
        return 127;
    }
    let total = total as f64;

    let mut sum_total = 0f64;
    for (i, &h) in hist.iter().enumerate() {
        sum_total += (i as f64) * (h as f64);
    }

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += (t as f64) * (h as f64);
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t as u8;
        }
    }

    best_t.saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_track_core::GrayImage;

    #[test]
    fn bimodal_samples_split_between_modes() {
        let mut samples = vec![20u8; 50];
        samples.extend(vec![220u8; 50]);
        let t = otsu_threshold_from_samples(&samples);
        assert!(t >= 20 && t < 220, "threshold {t} outside modes");
    }

    #[test]
    fn uniform_samples_return_that_value() {
        assert_eq!(otsu_threshold_from_samples(&[80; 16]), 80);
    }

    #[test]
    fn full_image_threshold_separates_dark_square() {
        let mut img = GrayImage::filled(64, 64, 230);
        for y in 16..48 {
            for x in 16..48 {
                img.data[y * 64 + x] = 25;
            }
        }
        let t = otsu_threshold(&img.view(), 1);
        assert!(t > 25 && t < 230);
    }
}
