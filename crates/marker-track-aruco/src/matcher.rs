//! Dictionary matching and rotation helpers.

use crate::Dictionary;

/// A dictionary match for an observed marker code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Marker id in the dictionary.
    pub id: u32,
    /// Rotation `0..=3` such that `observed == rotate(dict_code, rotation)`.
    pub rotation: u8,
    /// Hamming distance after rotation.
    pub hamming: u8,
}

/// Matcher for a fixed dictionary.
///
/// Brute-force over all ids and rotations; for the dictionary sizes used
/// here (tens of codes) this is fast and keeps memory small.
#[derive(Clone, Debug)]
pub struct Matcher {
    dict: Dictionary,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}

impl Matcher {
    /// Build a matcher; `max_hamming` is clamped to what the dictionary can
    /// correct without ambiguity.
    pub fn new(dict: Dictionary, max_hamming: u8) -> Self {
        let max_hamming = max_hamming.min(dict.max_correction_bits());
        let n = dict.marker_size;
        let rotated = dict
            .codes
            .iter()
            .map(|&base| {
                [
                    base,
                    rotate_code(base, n, 1),
                    rotate_code(base, n, 2),
                    rotate_code(base, n, 3),
                ]
            })
            .collect();

        Self {
            dict,
            max_hamming,
            rotated,
        }
    }

    #[inline]
    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    #[inline]
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Find the best match within `max_hamming`.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        let mut best: Option<Match> = None;

        for (id, rots) in self.rotated.iter().enumerate() {
            for (rot, &cand) in rots.iter().enumerate() {
                let h = (observed ^ cand).count_ones() as u8;
                if h > self.max_hamming {
                    continue;
                }
                let m = Match {
                    id: id as u32,
                    rotation: rot as u8,
                    hamming: h,
                };
                match best {
                    None => best = Some(m),
                    Some(prev) if m.hamming < prev.hamming => {
                        best = Some(m);
                    }
                    Some(_) => {}
                }
                if h == 0 {
                    return best;
                }
            }
        }

        best
    }
}

/// Rotate a code stored in row-major bits (`idx = y * n + x`) by `rot`
/// quarter turns.
pub fn rotate_code(code: u64, n: usize, rot: u8) -> u64 {
    let rot = rot & 3;
    if rot == 0 {
        return code;
    }

    #[inline]
    fn get(code: u64, idx: usize) -> u64 {
        (code >> idx) & 1
    }

    let mut out = 0u64;
    for y in 0..n {
        for x in 0..n {
            let (sx, sy) = match rot {
                1 => (y, n - 1 - x),
                2 => (n - 1 - x, n - 1 - y),
                _ => (n - 1 - y, x),
            };
            out |= get(code, sy * n + sx) << (y * n + x);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_four_times_is_identity() {
        let code = 0x0123_4567_89ab_cdef_u64;
        let n = 8;
        let mut r = code;
        for _ in 0..4 {
            r = rotate_code(r, n, 1);
        }
        assert_eq!(code, r);
    }

    #[test]
    fn matcher_finds_rotated_code() {
        let dict = Dictionary::default_4x4();
        let n = dict.marker_size;
        let base = dict.codes[5];
        let matcher = Matcher::new(dict, 0);

        let observed = rotate_code(base, n, 3);
        let m = matcher.match_code(observed).expect("match");
        assert_eq!(m.id, 5);
        assert_eq!(m.rotation, 3);
        assert_eq!(m.hamming, 0);
    }

    #[test]
    fn matcher_corrects_single_bit_error() {
        let dict = Dictionary::default_4x4();
        let base = dict.codes[0];
        let matcher = Matcher::new(dict, 1);

        let m = matcher.match_code(base ^ 1).expect("match");
        assert_eq!(m.id, 0);
        assert_eq!(m.hamming, 1);
    }

    #[test]
    fn garbage_code_does_not_match() {
        let dict = Dictionary::default_4x4();
        let codes = dict.codes.clone();
        let n = dict.marker_size;
        let matcher = Matcher::new(dict, 1);

        // Build a word at distance >= 2 from every rotated code.
        let mut probe = 0u64;
        'outer: for cand in 0..=u16::MAX as u64 {
            for &c in &codes {
                for rot in 0..4 {
                    if ((cand ^ rotate_code(c, n, rot)).count_ones()) < 2 {
                        continue 'outer;
                    }
                }
            }
            probe = cand;
            break;
        }
        assert!(matcher.match_code(probe).is_none());
    }
}
