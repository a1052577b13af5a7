//! Full-frame square marker detection.
//!
//! Pipeline: global Otsu binarization, connected dark components, convex
//! hull simplified to a quad, perspective rectification of the cell grid,
//! bit sampling with a border check, dictionary matching.
//!
//! Detection is independent per frame. No temporal smoothing happens here;
//! that is a deliberately open extension point for consumers.

use crate::threshold::{otsu_threshold, otsu_threshold_from_samples};
use crate::{Match, Matcher};
use marker_track_core::{homography_from_4pt, sample_bilinear_u8, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Detector configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Marker border width in cells.
    pub border_bits: usize,
    /// Reject quads with any side shorter than this (pixels).
    pub min_side_px: f64,
    /// Reject components covering more than this fraction of the frame.
    pub max_area_frac: f64,
    /// Supersampling grid per cell (`s x s` probes).
    pub samples_per_bit: usize,
    /// Fraction of a cell ignored near its edges while sampling.
    pub inset_frac: f64,
    /// Require at least this fraction of border cells to read black.
    pub min_border_score: f32,
    /// Maximum Hamming distance accepted from the matcher.
    pub max_hamming: u8,
    /// Subsampling stride for the global threshold pass.
    pub threshold_stride: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            border_bits: 1,
            min_side_px: 10.0,
            max_area_frac: 0.95,
            samples_per_bit: 3,
            inset_frac: 0.15,
            min_border_score: 0.85,
            max_hamming: 1,
            threshold_stride: 2,
        }
    }
}

/// One decoded marker.
#[derive(Clone, Debug)]
pub struct MarkerDetection {
    pub id: u32,
    /// Image-space corners in the marker's canonical order (top-left,
    /// top-right, bottom-right, bottom-left of the printed marker).
    pub corners: [Point2<f64>; 4],
    /// Observed inner bits after orientation correction was *not* applied
    /// (row-major, black=1, as sampled).
    pub code: u64,
    pub hamming: u8,
    pub border_score: f32,
}

impl MarkerDetection {
    /// Center of the marker quad in image coordinates.
    pub fn center(&self) -> Point2<f64> {
        let mut x = 0.0;
        let mut y = 0.0;
        for c in &self.corners {
            x += c.x;
            y += c.y;
        }
        Point2::new(x / 4.0, y / 4.0)
    }
}

/// Detect all decodable markers in a frame.
pub fn detect_markers(
    img: &GrayImageView<'_>,
    matcher: &Matcher,
    params: &DetectorParams,
) -> Vec<MarkerDetection> {
    if img.width < 8 || img.height < 8 {
        return Vec::new();
    }

    let threshold = otsu_threshold(img, params.threshold_stride);
    let components = dark_components(img, threshold, params);

    let mut out: Vec<MarkerDetection> = Vec::new();
    for quad in components {
        let Some(det) = decode_quad(img, &quad, matcher, params) else {
            continue;
        };
        out.push(det);
    }

    dedup_by_id_keep_best(out)
}

/// A quad candidate: ordered corners with positive shoelace winding
/// (top-left, top-right, bottom-right, bottom-left on screen, up to
/// rotation).
type Quad = [Point2<f64>; 4];

fn decode_quad(
    img: &GrayImageView<'_>,
    quad: &Quad,
    matcher: &Matcher,
    params: &DetectorParams,
) -> Option<MarkerDetection> {
    let n = matcher.dictionary().marker_size;
    let b = params.border_bits;
    let cells = n + 2 * b;

    let cell_corners = [
        Point2::new(0.0, 0.0),
        Point2::new(cells as f64, 0.0),
        Point2::new(cells as f64, cells as f64),
        Point2::new(0.0, cells as f64),
    ];
    let h = homography_from_4pt(&cell_corners, quad)?;

    // Mean intensity per cell, then one Otsu cut over all of them.
    let s = params.samples_per_bit.max(1);
    let inset = params.inset_frac.clamp(0.0, 0.45);
    let mut means = Vec::with_capacity(cells * cells);
    for cy in 0..cells {
        for cx in 0..cells {
            let mut acc = 0u32;
            for sy in 0..s {
                for sx in 0..s {
                    let u = cx as f64 + inset + (1.0 - 2.0 * inset) * ((sx as f64 + 0.5) / s as f64);
                    let v = cy as f64 + inset + (1.0 - 2.0 * inset) * ((sy as f64 + 0.5) / s as f64);
                    let p = h.apply(Point2::new(u, v));
                    acc += u32::from(sample_bilinear_u8(img, p.x as f32, p.y as f32));
                }
            }
            means.push((acc / (s * s) as u32) as u8);
        }
    }

    let cut = otsu_threshold_from_samples(&means);
    let black = |cx: usize, cy: usize| means[cy * cells + cx] < cut;

    // Border check first; a quad that is not black-ringed is not a marker.
    let mut border_total = 0u32;
    let mut border_black = 0u32;
    for cy in 0..cells {
        for cx in 0..cells {
            let on_border = cx < b || cy < b || cx >= cells - b || cy >= cells - b;
            if on_border {
                border_total += 1;
                if black(cx, cy) {
                    border_black += 1;
                }
            }
        }
    }
    let border_score = border_black as f32 / border_total as f32;
    if border_score < params.min_border_score {
        return None;
    }

    let mut code = 0u64;
    for by in 0..n {
        for bx in 0..n {
            if black(bx + b, by + b) {
                code |= 1u64 << (by * n + bx);
            }
        }
    }

    let m: Match = matcher.match_code(code)?;
    if m.hamming > params.max_hamming {
        return None;
    }

    // The observed pattern is the dictionary pattern rotated clockwise by
    // `m.rotation` quarter turns, so the canonical top-left corner sits at
    // sampled corner index `m.rotation`.
    let r = m.rotation as usize;
    let corners = [
        quad[r],
        quad[(r + 1) % 4],
        quad[(r + 2) % 4],
        quad[(r + 3) % 4],
    ];

    Some(MarkerDetection {
        id: m.id,
        corners,
        code,
        hamming: m.hamming,
        border_score,
    })
}

/// Extract quad candidates from connected dark components.
fn dark_components(img: &GrayImageView<'_>, threshold: u8, params: &DetectorParams) -> Vec<Quad> {
    let w = img.width;
    let h = img.height;
    let max_area = (params.max_area_frac * (w * h) as f64) as usize;
    // A valid quad encloses at least a min_side x min_side ring.
    let min_area = (params.min_side_px * 2.0) as usize;

    let mut visited = vec![false; w * h];
    let mut quads = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut boundary: Vec<Point2<f64>> = Vec::new();

    let dark = |idx: usize| img.data[idx] < threshold;

    for start in 0..w * h {
        if visited[start] || !dark(start) {
            continue;
        }

        stack.clear();
        boundary.clear();
        stack.push(start);
        visited[start] = true;
        let mut area = 0usize;
        let mut touches_edge = false;

        while let Some(idx) = stack.pop() {
            area += 1;
            let x = idx % w;
            let y = idx / w;

            if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                touches_edge = true;
            }

            let mut interior = true;
            let mut push = |nidx: usize, visited: &mut Vec<bool>, stack: &mut Vec<usize>| {
                if dark(nidx) {
                    if !visited[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                } else {
                    interior = false;
                }
            };

            if x > 0 {
                push(idx - 1, &mut visited, &mut stack);
            }
            if x + 1 < w {
                push(idx + 1, &mut visited, &mut stack);
            }
            if y > 0 {
                push(idx - w, &mut visited, &mut stack);
            }
            if y + 1 < h {
                push(idx + w, &mut visited, &mut stack);
            }

            if !interior || x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                boundary.push(Point2::new(x as f64, y as f64));
            }
        }

        if touches_edge || area < min_area || area > max_area {
            continue;
        }
        let Some(quad) = quad_from_boundary(&boundary, params.min_side_px) else {
            continue;
        };
        quads.push(quad);
    }

    quads
}

/// Convex hull (monotone chain) simplified down to the 4 dominant corners.
fn quad_from_boundary(boundary: &[Point2<f64>], min_side_px: f64) -> Option<Quad> {
    if boundary.len() < 4 {
        return None;
    }

    let mut pts: Vec<Point2<f64>> = boundary.to_vec();
    pts.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap().then(a.y.partial_cmp(&b.y).unwrap()));
    pts.dedup_by(|a, b| a.x == b.x && a.y == b.y);
    if pts.len() < 4 {
        return None;
    }

    let cross = |o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>| {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    };

    let mut lower: Vec<Point2<f64>> = Vec::new();
    for p in &pts {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0
        {
            lower.pop();
        }
        lower.push(*p);
    }
    let mut upper: Vec<Point2<f64>> = Vec::new();
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0
        {
            upper.pop();
        }
        upper.push(*p);
    }
    lower.pop();
    upper.pop();
    let mut hull = lower;
    hull.extend(upper);

    if hull.len() < 4 {
        return None;
    }

    // Remove the vertex with the smallest corner triangle until 4 remain.
    while hull.len() > 4 {
        let len = hull.len();
        let mut min_i = 0;
        let mut min_a = f64::INFINITY;
        for i in 0..len {
            let prev = &hull[(i + len - 1) % len];
            let next = &hull[(i + 1) % len];
            let a = cross(prev, &hull[i], next).abs();
            if a < min_a {
                min_a = a;
                min_i = i;
            }
        }
        hull.remove(min_i);
    }

    // Winding: cell corner order needs a positive shoelace sum in image
    // coordinates (y down).
    let mut quad: Quad = [hull[0], hull[1], hull[2], hull[3]];
    let mut area2 = 0.0;
    for i in 0..4 {
        let a = &quad[i];
        let b = &quad[(i + 1) % 4];
        area2 += a.x * b.y - b.x * a.y;
    }
    if area2 < 0.0 {
        quad.swap(1, 3);
    }

    for i in 0..4 {
        let d = quad[(i + 1) % 4] - quad[i];
        if d.norm() < min_side_px {
            return None;
        }
    }

    Some(quad)
}

/// Keep only the best detection per id (lowest Hamming, then border score).
fn dedup_by_id_keep_best(mut dets: Vec<MarkerDetection>) -> Vec<MarkerDetection> {
    dets.sort_by(|a, b| {
        a.id.cmp(&b.id)
            .then(a.hamming.cmp(&b.hamming))
            .then(b.border_score.partial_cmp(&a.border_score).unwrap_or(std::cmp::Ordering::Equal))
    });
    dets.dedup_by_key(|d| d.id);
    dets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{paste, render_marker, rotate90};
    use crate::Dictionary;
    use approx::assert_abs_diff_eq;
    use marker_track_core::GrayImage;

    fn default_matcher() -> Matcher {
        Matcher::new(Dictionary::default_4x4(), 1)
    }

    fn marker_canvas(id: u32, module_px: usize, at: (usize, usize), canvas: (usize, usize)) -> GrayImage {
        let dict = Dictionary::default_4x4();
        let m = render_marker(&dict, id, module_px, 1, 0).expect("render");
        let mut img = GrayImage::filled(canvas.0, canvas.1, 255);
        paste(&mut img, &m, at.0, at.1);
        img
    }

    #[test]
    fn detects_rendered_marker_with_correct_id_and_corners() {
        let img = marker_canvas(7, 8, (30, 22), (160, 120));
        let dets = detect_markers(&img.view(), &default_matcher(), &DetectorParams::default());
        assert_eq!(dets.len(), 1);
        let det = &dets[0];
        assert_eq!(det.id, 7);
        assert_eq!(det.hamming, 0);

        // Marker spans 6 cells * 8 px starting at (30, 22); canonical TL is
        // the render's TL since the marker is upright.
        let tl = det.corners[0];
        assert_abs_diff_eq!(tl.x, 30.0, epsilon = 2.5);
        assert_abs_diff_eq!(tl.y, 22.0, epsilon = 2.5);
        let tr = det.corners[1];
        assert_abs_diff_eq!(tr.x, 77.0, epsilon = 2.5);
    }

    #[test]
    fn resolves_rotation_of_a_quarter_turned_marker() {
        let img = marker_canvas(3, 8, (24, 24), (120, 120));
        let rotated = rotate90(&img);
        let dets = detect_markers(&rotated.view(), &default_matcher(), &DetectorParams::default());
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].id, 3);
        // Canonical TL of the printed marker moved to the top-right area.
        let tl = dets[0].corners[0];
        assert!(tl.x > 60.0, "canonical TL should follow the rotation, got {tl:?}");
    }

    #[test]
    fn detects_multiple_markers_in_one_frame() {
        let mut img = marker_canvas(1, 8, (10, 10), (220, 120));
        let dict = Dictionary::default_4x4();
        let second = render_marker(&dict, 9, 8, 1, 0).expect("render");
        paste(&mut img, &second, 130, 40);

        let dets = detect_markers(&img.view(), &default_matcher(), &DetectorParams::default());
        let mut ids: Vec<u32> = dets.iter().map(|d| d.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 9]);
    }

    #[test]
    fn blank_frame_yields_nothing() {
        let img = GrayImage::filled(100, 100, 200);
        let dets = detect_markers(&img.view(), &default_matcher(), &DetectorParams::default());
        assert!(dets.is_empty());
    }

    #[test]
    fn plain_dark_square_is_rejected_by_decoding() {
        let mut img = GrayImage::filled(120, 120, 230);
        for y in 30..80 {
            for x in 30..80 {
                img.data[y * 120 + x] = 10;
            }
        }
        let dets = detect_markers(&img.view(), &default_matcher(), &DetectorParams::default());
        assert!(dets.is_empty());
    }
}
