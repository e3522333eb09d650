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

use crate::shared::Mode;

/// Forces are carried in grams; the console talks kilograms.
pub const GRAMS_PER_KG: f32 = 1000.0;

pub const GAMMA_MIN: f32 = 0.25;
pub const GAMMA_MAX: f32 = 4.0;

/// The calibrated parameter set for one pedal.
///
/// Mutated only by the calibration procedures, persisted only on explicit
/// operator confirmation. Forces are post-scale sensor readings in grams.
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalParams {
    /// Sensor scale factor relating raw counts to grams.
    pub reference_scale: f32,
    /// Pedal force at 100 % braking.
    pub max_force: f32,
    /// Pedal force at 0 % braking. Must stay below `max_force`.
    pub min_force: f32,
    /// Output-side ceiling reduction in percent, in (0, 100].
    pub reduction_pct: f32,
    /// Output code emitted at 0 % braking.
    pub min_code: u8,
    /// Output code emitted at 100 % braking.
    pub max_code: u8,
    /// Map through the reference curve instead of linearly.
    pub linearize: bool,
    /// Curve exponent for normalized mode, in [GAMMA_MIN, GAMMA_MAX].
    pub gamma: f32,
}

impl Default for CalParams {
    fn default() -> Self {
        // Placeholder span plus the output codes of a stock Logitech brake
        // input (0 % sits at the higher voltage). Replaced by console
        // calibration on a real pedal.
        Self {
            reference_scale: 1.23,
            max_force: 20_000.0,
            min_force: 1_500.0,
            reduction_pct: 100.0,
            min_code: 221,
            max_code: 149,
            linearize: true,
            gamma: 1.0,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamError {
    ForceSpan,
    ReductionRange,
    GammaRange,
}

impl ParamError {
    pub fn describe(self) -> &'static str {
        match self {
            ParamError::ForceSpan => "min force must be below max force",
            ParamError::ReductionRange => "reduction factor must be in (0, 100]",
            ParamError::GammaRange => "gamma must be in [0.25, 4.0]",
        }
    }
}

impl CalParams {
    /// Whether codes grow with braking. The stock Logitech input is wired the
    /// other way around.
    pub fn direction_increasing(&self) -> bool {
        self.max_code > self.min_code
    }

    /// The pipeline mode this parameter set selects while not paused.
    pub fn run_mode(&self) -> Mode {
        if self.linearize {
            Mode::Normalized
        } else {
            Mode::Raw
        }
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if self.min_force >= self.max_force {
            return Err(ParamError::ForceSpan);
        }
        if !(self.reduction_pct > 0.0 && self.reduction_pct <= 100.0) {
            return Err(ParamError::ReductionRange);
        }
        if !(GAMMA_MIN..=GAMMA_MAX).contains(&self.gamma) {
            return Err(ParamError::GammaRange);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(CalParams::default().validate(), Ok(()));
    }

    #[test]
    fn default_direction_matches_stock_wiring() {
        assert!(!CalParams::default().direction_increasing());
    }

    #[test]
    fn validation_rejects_bad_ranges() {
        let mut params = CalParams::default();
        params.min_force = params.max_force;
        assert_eq!(params.validate(), Err(ParamError::ForceSpan));

        let mut params = CalParams::default();
        params.reduction_pct = 0.0;
        assert_eq!(params.validate(), Err(ParamError::ReductionRange));
        params.reduction_pct = 100.5;
        assert_eq!(params.validate(), Err(ParamError::ReductionRange));

        let mut params = CalParams::default();
        params.gamma = 4.5;
        assert_eq!(params.validate(), Err(ParamError::GammaRange));
    }
}
