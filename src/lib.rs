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

//! Control core for a load-cell brake pedal feeding a console/PC analog
//! input. Maps calibrated pedal force onto an 8-bit output code through a
//! configurable braking curve, dithering between adjacent codes to win
//! sub-code resolution out of the DAC.
//!
//! Hardware access (load cell, DAC, flash region, console transports) is
//! behind traits so the whole pipeline runs under the host test harness.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_op_in_unsafe_fn)]
// Collaborator traits are async and meant for this crate's tasks, not for
// arbitrary generic executors, so the Send-bound caveat does not bite.
#![allow(async_fn_in_trait)]

#[macro_use]
pub mod log;

pub mod console;
pub mod curve;
pub mod mapping;
pub mod nonvolatile;
pub mod output;
pub mod params;
pub mod pedal;
pub mod shared;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_sync::pubsub::PubSubChannel;

// Leave some room for a command to queue up behind procedure replies. If this
// is too small, a console that types ahead can get stuck.
pub const LINE_QUEUE_DEPTH: usize = 4;
pub type LineChannel = Channel<CriticalSectionRawMutex, console::Line, LINE_QUEUE_DEPTH>;
pub type LineSender<'a> = Sender<'a, CriticalSectionRawMutex, console::Line, LINE_QUEUE_DEPTH>;
pub type LineReceiver<'a> = Receiver<'a, CriticalSectionRawMutex, console::Line, LINE_QUEUE_DEPTH>;

/// Outbound text fans out to every attached console (serial, BT, USB, ...).
pub const MAX_CONSOLES: usize = 2;
pub const MESSAGE_QUEUE_DEPTH: usize = 8;
pub type MessageBus =
    PubSubChannel<CriticalSectionRawMutex, console::Message, MESSAGE_QUEUE_DEPTH, MAX_CONSOLES, 1>;
