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

pub mod calibrate;
pub mod sim;
mod task;

pub use task::{run, RebootRequest, StartupError};

/// The load-cell acquisition driver, HX711-style: it owns filtering, the
/// tare offset, and the counts-to-grams scale; this crate only consumes
/// finished readings.
pub trait ForceSensor {
    /// Wait for the next conversion. Cancel-safe: dropping the future leaves
    /// the driver ready to be polled again.
    async fn update(&mut self);

    /// The latest filtered force in grams.
    fn get_data(&mut self) -> f32;

    /// Start re-zeroing on the current load. Completion is reported through
    /// `tare_done` while `update` keeps the driver fed.
    fn tare(&mut self);

    fn tare_done(&mut self) -> bool;

    /// Refill the filter window so the next reading reflects the load on the
    /// pedal right now, not history.
    async fn refresh_dataset(&mut self);

    /// Derive the counts-to-grams scale from a known mass resting on the
    /// cell, apply it, and return it.
    fn derive_scale(&mut self, known_mass: f32) -> f32;

    fn set_scale(&mut self, scale: f32);
}
