//! Marker dictionaries generated with a minimum Hamming separation.
//!
//! Codes are stored one `u64` per marker id, inner `marker_size x marker_size`
//! bits in row-major order with **black = 1**. Instead of embedding vendor
//! tables, dictionaries are generated deterministically from a seed while
//! enforcing the property the matcher depends on: every pair of codes (and
//! every rotated variant, and each code against its own rotations) differs in
//! at least `min_distance` bits.

use std::sync::OnceLock;

use log::{debug, warn};
use thiserror::Error;

use crate::matcher::rotate_code;

/// A fixed marker dictionary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dictionary {
    /// Human-readable name (for logging and diagnostics).
    pub name: String,
    /// Marker side length in bits (inner payload, border excluded).
    pub marker_size: usize,
    /// Minimum pairwise Hamming distance the generator enforced.
    pub min_distance: u8,
    /// One `u64` per marker id.
    pub codes: Vec<u64>,
}

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("marker_size {0} implies more than 64 bits (unsupported)")]
    TooManyBits(usize),
    #[error("marker_size must be at least 3, got {0}")]
    TooSmall(usize),
    #[error("could not generate {requested} codes with distance {min_distance} (got {generated})")]
    Exhausted {
        requested: usize,
        generated: usize,
        min_distance: u8,
    },
}

impl Dictionary {
    /// Total number of inner bits per marker.
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    /// Maximum Hamming distance the matcher may correct without risking an
    /// id mix-up.
    #[inline]
    pub fn max_correction_bits(&self) -> u8 {
        self.min_distance.saturating_sub(1) / 2
    }

    /// The fixed default dictionary: 4x4 payload, 64 ids, seed 7.
    ///
    /// Two processes constructing this agree on every code, so ids can be
    /// exchanged across machines. Generation runs once per process and the
    /// result is cached; these parameters are known-feasible, so this is
    /// the one place the crate panics rather than propagating
    /// `DictionaryError`.
    pub fn default_4x4() -> Self {
        static DEFAULT: OnceLock<Dictionary> = OnceLock::new();
        DEFAULT
            .get_or_init(|| {
                Self::generate("GEN_4X4_64", 4, 64, 4, 7)
                    .expect("default dictionary parameters are feasible")
            })
            .clone()
    }

    /// Generate a dictionary deterministically from `seed`.
    ///
    /// Candidate codes come from a xorshift stream; a candidate is accepted
    /// when all four of its rotations keep at least `min_distance` bits from
    /// every already-accepted rotation, and when the code is at least
    /// `min_distance` bits away from its own rotations (so the matcher can
    /// resolve orientation unambiguously).
    pub fn generate(
        name: &str,
        marker_size: usize,
        count: usize,
        min_distance: u8,
        seed: u64,
    ) -> Result<Self, DictionaryError> {
        if marker_size < 3 {
            return Err(DictionaryError::TooSmall(marker_size));
        }
        let bits = marker_size * marker_size;
        if bits > 64 {
            return Err(DictionaryError::TooManyBits(marker_size));
        }
        let mask = if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        };

        let mut rng = XorShift64::new(seed);
        let mut codes: Vec<u64> = Vec::with_capacity(count);
        let mut accepted_rotations: Vec<u64> = Vec::with_capacity(count * 4);

        // Bounded search; parameters that cannot be satisfied fail instead
        // of spinning forever.
        let max_attempts = count * 20_000;
        let mut attempts = 0;
        while codes.len() < count && attempts < max_attempts {
            attempts += 1;
            let cand = rng.next() & mask;

            if !has_bit_balance(cand, bits) {
                continue;
            }

            let rots = [
                cand,
                rotate_code(cand, marker_size, 1),
                rotate_code(cand, marker_size, 2),
                rotate_code(cand, marker_size, 3),
            ];

            if !self_distance_ok(&rots, min_distance) {
                continue;
            }

            let far_enough = rots.iter().all(|&r| {
                accepted_rotations
                    .iter()
                    .all(|&a| (r ^ a).count_ones() >= u32::from(min_distance))
            });
            if !far_enough {
                continue;
            }

            codes.push(cand);
            accepted_rotations.extend_from_slice(&rots);
        }

        if codes.len() < count {
            warn!(
                "dictionary {name}: search exhausted after {attempts} attempts, \
                 {}/{count} codes at distance {min_distance}",
                codes.len()
            );
            return Err(DictionaryError::Exhausted {
                requested: count,
                generated: codes.len(),
                min_distance,
            });
        }

        debug!("dictionary {name}: {count} codes accepted in {attempts} attempts");
        Ok(Self {
            name: name.to_string(),
            marker_size,
            min_distance,
            codes,
        })
    }
}

/// Reject near-uniform codes; a marker needs visible structure to decode.
fn has_bit_balance(code: u64, bits: usize) -> bool {
    let ones = code.count_ones() as usize;
    let lo = bits / 4;
    let hi = bits - lo;
    ones >= lo && ones <= hi
}

fn self_distance_ok(rots: &[u64; 4], min_distance: u8) -> bool {
    for i in 0..4 {
        for j in (i + 1)..4 {
            if (rots[i] ^ rots[j]).count_ones() < u32::from(min_distance) {
                return false;
            }
        }
    }
    true
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1,
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}
