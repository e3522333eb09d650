// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The reference brake-feel curve: load fraction per table index, index 0 at
//! full braking down to index 78 at none. Measured on the reference pedal;
//! immutable at runtime.

pub const CURVE_LEN: usize = 79;

/// Fractions at or beyond these guards snap to the terminal table entries and
/// carry no duty cycle.
pub const LOWER_GUARD: f32 = 0.0001;
pub const UPPER_GUARD: f32 = 0.9999;

#[rustfmt::skip]
pub const REFERENCE_CURVE: [f32; CURVE_LEN] = [
    1.0, 0.963, 0.93, 0.895, 0.86, 0.835, 0.804, 0.776, 0.749, 0.725,
    0.701, 0.68, 0.66, 0.642, 0.625, 0.609, 0.595, 0.58, 0.564, 0.55,
    0.535, 0.525, 0.512, 0.498, 0.485, 0.475, 0.462, 0.455, 0.447, 0.439,
    0.431, 0.423, 0.416, 0.408, 0.4, 0.392, 0.384, 0.377, 0.369, 0.361,
    0.353, 0.345, 0.337, 0.33, 0.322, 0.314, 0.306, 0.298, 0.291, 0.283,
    0.275, 0.267, 0.259, 0.252, 0.247, 0.236, 0.228, 0.220, 0.212, 0.205,
    0.197, 0.189, 0.181, 0.173, 0.166, 0.158, 0.15, 0.142, 0.134, 0.127,
    0.116, 0.105, 0.094, 0.078, 0.063, 0.047, 0.031, 0.016, 0.0,
];

/// One curve segment. `lower` is the higher index (smaller fraction); for
/// terminal fractions both ends name the same entry.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Band {
    pub lower: usize,
    pub upper: usize,
}

impl Band {
    pub fn lower_fraction(&self) -> f32 {
        REFERENCE_CURVE[self.lower]
    }

    pub fn upper_fraction(&self) -> f32 {
        REFERENCE_CURVE[self.upper]
    }
}

/// Find the band bracketing `fraction`:
/// `curve[lower] < fraction <= curve[upper]` with `upper = lower - 1`.
pub fn band_for(fraction: f32) -> Band {
    if fraction < LOWER_GUARD {
        return Band {
            lower: CURVE_LEN - 1,
            upper: CURVE_LEN - 1,
        };
    }
    if fraction > UPPER_GUARD {
        return Band { lower: 0, upper: 0 };
    }
    let mut lower = CURVE_LEN - 1;
    let mut upper = CURVE_LEN - 1;
    for n in (0..CURVE_LEN).rev() {
        if fraction > REFERENCE_CURVE[n] {
            lower = n;
            upper = n.saturating_sub(1);
        } else {
            break;
        }
    }
    Band { lower, upper }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_monotonic_descending() {
        for pair in REFERENCE_CURVE.windows(2) {
            assert!(pair[0] > pair[1], "{} !> {}", pair[0], pair[1]);
        }
        assert_eq!(REFERENCE_CURVE[0], 1.0);
        assert_eq!(REFERENCE_CURVE[CURVE_LEN - 1], 0.0);
    }

    #[test]
    fn midpoint_brackets() {
        let band = band_for(0.5);
        assert_eq!(band.upper, band.lower - 1);
        assert!(band.lower_fraction() < 0.5);
        assert!(0.5 <= band.upper_fraction());
    }

    #[test]
    fn exact_table_value_lands_on_upper_end() {
        // A fraction sitting exactly on an entry gets that entry as its
        // upper end, so the full duty goes to it.
        let band = band_for(REFERENCE_CURVE[20]);
        assert_eq!(band.upper, 20);
        assert_eq!(band.lower, 21);
    }

    #[test]
    fn terminal_fractions_use_the_end_entries_twice() {
        assert_eq!(
            band_for(0.0),
            Band {
                lower: CURVE_LEN - 1,
                upper: CURVE_LEN - 1
            }
        );
        assert_eq!(band_for(1.0), Band { lower: 0, upper: 0 });
    }

    #[test]
    fn band_index_never_rises_with_growing_fraction() {
        let mut previous = CURVE_LEN - 1;
        let mut fraction = 0.0;
        while fraction <= 1.0 {
            let band = band_for(fraction);
            assert!(band.lower <= previous);
            previous = band.lower;
            fraction += 0.001;
        }
    }
}
