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

//! Pure force-to-output mapping. No I/O, no shared state; the same clamped
//! reading and parameters always produce the same directive.

use num_traits::Float;

use crate::curve::{self, CURVE_LEN};
use crate::params::CalParams;

/// Empirical output-shaping constants, kept adjustable rather than baked in.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tuning {
    /// Steps per dithering window.
    pub dither_window: u8,
    /// Codes to push past an extreme so the output cannot chatter around a
    /// calibrated endpoint.
    pub deadband_offset: u8,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            dither_window: 10,
            deadband_offset: 3,
        }
    }
}

/// What the output driver renders until the next sample supersedes it.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Directive {
    /// Hold one code.
    Single(u8),
    /// Alternate two neighboring codes; the cycle counts fill one window.
    Dither {
        lower_code: u8,
        upper_code: u8,
        lower_cycles: u8,
        upper_cycles: u8,
    },
}

/// Straight-line interpolation between two ranges. A degenerate input span
/// yields `out_min` instead of dividing by zero.
pub fn linear_map(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    let span = in_max - in_min;
    if span.abs() < f32::EPSILON {
        return out_min;
    }
    out_min + (value - in_min) * (out_max - out_min) / span
}

fn to_code(value: f32) -> u8 {
    (value + 0.5).clamp(0.0, 255.0) as u8
}

/// Map one clamped force reading according to the active mode.
pub fn map(force: f32, params: &CalParams, tuning: &Tuning) -> Directive {
    if params.linearize {
        map_normalized(force, params, tuning)
    } else {
        Directive::Single(map_raw(force, params, tuning))
    }
}

/// The reduced output ceiling. With inverted wiring "reducing" the ceiling
/// means raising the code back toward the 0 % end.
fn effective_ceiling(params: &CalParams) -> f32 {
    let max = f32::from(params.max_code);
    if params.direction_increasing() {
        max * (params.reduction_pct / 100.0)
    } else {
        max * ((100.0 + (100.0 - params.reduction_pct)) / 100.0)
    }
}

/// Raw mode: force interpolates straight between the calibrated codes.
/// Forces at or beyond an extreme land one deadband step past it.
pub fn map_raw(force: f32, params: &CalParams, tuning: &Tuning) -> u8 {
    let offset = f32::from(tuning.deadband_offset);
    let ceiling = effective_ceiling(params);
    let min = f32::from(params.min_code);
    let code = if force > params.min_force && force < params.max_force {
        linear_map(
            force,
            params.min_force,
            params.max_force,
            min,
            ceiling,
        )
    } else if force <= params.min_force {
        if params.direction_increasing() {
            min - offset
        } else {
            min + offset
        }
    } else if params.direction_increasing() {
        ceiling + offset
    } else {
        ceiling - offset
    };
    to_code(code)
}

/// Duty cycles for one window, weighted by where the fraction sits inside
/// its band. The upper count is the window complement so a window can never
/// be overfilled.
fn cycles_for(fraction: f32, band: &curve::Band, window: u8) -> (u8, u8) {
    let delta = (band.upper_fraction() - band.lower_fraction()).abs();
    if delta <= curve::LOWER_GUARD {
        return (0, 0);
    }
    let lower_weight = 1.0 - (fraction - band.lower_fraction()).abs() / delta;
    let lower_cycles = (f32::from(window) * lower_weight + 0.5) as u8;
    let lower_cycles = lower_cycles.min(window);
    (lower_cycles, window - lower_cycles)
}

fn band_code(index: usize, params: &CalParams) -> u8 {
    to_code(linear_map(
        index as f32,
        (CURVE_LEN - 1) as f32,
        0.0,
        f32::from(params.min_code),
        f32::from(params.max_code),
    ))
}

/// Push a code sitting exactly on a calibrated extreme one deadband step
/// outward, away from the active span.
fn nudge_outward(code: u8, params: &CalParams, tuning: &Tuning) -> u8 {
    let offset = f32::from(tuning.deadband_offset);
    let value = f32::from(code);
    let at_min = code == params.min_code;
    let nudged = if params.direction_increasing() == at_min {
        value - offset
    } else {
        value + offset
    };
    to_code(nudged)
}

/// Normalized mode: force becomes a braking fraction, gamma shapes it, the
/// reference curve picks the band, and the band's two codes share a
/// dithering window.
pub fn map_normalized(force: f32, params: &CalParams, tuning: &Tuning) -> Directive {
    let mut fraction = linear_map(
        force,
        params.min_force,
        params.max_force,
        0.0,
        params.reduction_pct / 100.0,
    )
    .clamp(0.0, 1.0);
    if params.gamma != 1.0 {
        fraction = fraction.powf(1.0 / params.gamma);
    }

    let band = curve::band_for(fraction);
    let (lower_cycles, upper_cycles) = cycles_for(fraction, &band, tuning.dither_window);
    let lower_code = band_code(band.lower, params);
    let upper_code = band_code(band.upper, params);

    if lower_code == params.min_code || lower_code == params.max_code {
        return Directive::Single(nudge_outward(lower_code, params, tuning));
    }

    match (lower_cycles, upper_cycles) {
        (0, 0) => Directive::Single(lower_code),
        (0, _) => Directive::Single(upper_code),
        (_, 0) => Directive::Single(lower_code),
        _ => Directive::Dither {
            lower_code,
            upper_code,
            lower_cycles,
            upper_cycles,
        },
    }
}
