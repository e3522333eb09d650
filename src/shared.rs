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

//! The shared handoff between the sampling loop (writer) and the output
//! driver (reader). Both sides only ever copy under the lock; anything that
//! computes or does I/O happens outside it.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::mapping::Directive;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Raw,
    Normalized,
    /// Calibration in progress: the driver holds the output as-is.
    Paused,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlState {
    pub directive: Directive,
    pub mode: Mode,
    /// Wrapping count of published samples, for lost-sample accounting.
    pub sample_count: u32,
}

impl ControlState {
    /// Before the first sample lands nothing may reach the output.
    pub const fn startup() -> Self {
        Self {
            directive: Directive::Single(0),
            mode: Mode::Paused,
            sample_count: 0,
        }
    }
}

pub struct SharedState {
    inner: Mutex<CriticalSectionRawMutex, Cell<ControlState>>,
}

impl SharedState {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(ControlState::startup())),
        }
    }

    /// Publish the result of one sampling cycle.
    pub fn publish(&self, directive: Directive, mode: Mode, sample_count: u32) {
        self.inner.lock(|state| {
            state.set(ControlState {
                directive,
                mode,
                sample_count,
            });
        });
    }

    /// Replace the directive without touching the sample counter. Used by the
    /// output-range sweep to drive codes manually while sampling is halted.
    pub fn override_directive(&self, directive: Directive, mode: Mode) {
        self.inner.lock(|state| {
            let mut current = state.get();
            current.directive = directive;
            current.mode = mode;
            state.set(current);
        });
    }

    pub fn set_mode(&self, mode: Mode) {
        self.inner.lock(|state| {
            let mut current = state.get();
            current.mode = mode;
            state.set(current);
        });
    }

    pub fn mode(&self) -> Mode {
        self.inner.lock(|state| state.get().mode)
    }

    pub fn snapshot(&self) -> ControlState {
        self.inner.lock(Cell::get)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
