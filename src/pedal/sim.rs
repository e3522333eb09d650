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

//! Synthetic load sources for bench work without a load cell, selectable
//! from the console. Both advance per sample so runs are reproducible.

use core::f32::consts::TAU;

use num_traits::Float;

use crate::mapping::linear_map;
use crate::params::CalParams;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SimMode {
    Off,
    Sine,
    Steps,
}

impl SimMode {
    pub fn describe(self) -> &'static str {
        match self {
            SimMode::Off => "load cell",
            SimMode::Sine => "sine sweep",
            SimMode::Steps => "step curve",
        }
    }
}

/// Phase advance per sample; one full pedal stroke takes a couple of
/// seconds at the sensor's ~89 Hz cadence.
pub const PHASE_STEP: f32 = 0.05;

/// A sine sweep across the whole calibrated force span.
pub struct SineSource {
    phase: f32,
}

impl SineSource {
    pub const fn new() -> Self {
        Self { phase: 0.0 }
    }

    pub fn next(&mut self, params: &CalParams) -> f32 {
        let wave = self.phase.sin();
        self.phase += PHASE_STEP;
        if self.phase > TAU {
            self.phase = 0.0;
        }
        linear_map(wave, -1.0, 1.0, params.min_force, params.max_force)
    }
}

impl Default for SineSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples per staircase level; roughly five seconds per level at the
/// sensor cadence.
pub const HOLD_SAMPLES: u32 = 445;

const STEP_TABLE: [f32; 9] = [100.0, 75.0, 50.0, 25.0, 0.0, 25.0, 50.0, 75.0, 100.0];

/// Walks braking percentages down to zero and back up, holding each level.
pub struct StepSource {
    index: usize,
    held: u32,
}

impl StepSource {
    pub const fn new() -> Self {
        Self { index: 0, held: 0 }
    }

    pub fn next(&mut self, params: &CalParams) -> f32 {
        let percent = STEP_TABLE[self.index];
        self.held += 1;
        if self.held >= HOLD_SAMPLES {
            self.held = 0;
            self.index = (self.index + 1) % STEP_TABLE.len();
        }
        linear_map(percent, 0.0, 100.0, params.min_force, params.max_force)
    }
}

impl Default for StepSource {
    fn default() -> Self {
        Self::new()
    }
}
