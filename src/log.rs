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

//! Logging facade: `defmt` on target, `log` on the host, silence otherwise.
//! Callers use `crate::info!` and friends; format strings stick to plain
//! `{}` so both backends accept them.

// NOTE: These macros are defined with direct `#[cfg(...)]` attributes rather
// than via `cfg_if!`. `#[macro_export]` macros produced by a macro expansion
// (such as `cfg_if!`) cannot be referred to by absolute path (`crate::info!`),
// so the definitions must appear directly in the module body.

#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { ::defmt::trace!($($arg)*) };
}
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { ::defmt::debug!($($arg)*) };
}
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { ::defmt::info!($($arg)*) };
}
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { ::defmt::warn!($($arg)*) };
}
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { ::defmt::error!($($arg)*) };
}

#[cfg(all(not(feature = "defmt"), feature = "log"))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { ::log::trace!($($arg)*) };
}
#[cfg(all(not(feature = "defmt"), feature = "log"))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { ::log::debug!($($arg)*) };
}
#[cfg(all(not(feature = "defmt"), feature = "log"))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { ::log::info!($($arg)*) };
}
#[cfg(all(not(feature = "defmt"), feature = "log"))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { ::log::warn!($($arg)*) };
}
#[cfg(all(not(feature = "defmt"), feature = "log"))]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { ::log::error!($($arg)*) };
}

#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { { let _ = ($($arg)*,); } };
}
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { { let _ = ($($arg)*,); } };
}
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { { let _ = ($($arg)*,); } };
}
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { { let _ = ($($arg)*,); } };
}
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { { let _ = ($($arg)*,); } };
}
