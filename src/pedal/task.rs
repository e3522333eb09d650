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

//! The sampling loop: pull readings at the sensor's pace, map them, publish
//! the result, and field console commands in between samples. Calibration
//! runs right here, on this task, so sampling is naturally suspended while
//! the operator types.

use core::fmt::Write;

use embassy_futures::select::{select, Either};
use embassy_time::{with_timeout, Duration, Instant, Timer};

use crate::console::{self, Dialog, Message};
use crate::mapping::{self, Directive, Tuning};
use crate::nonvolatile::{ParamStore, StoreBackend};
use crate::output::code_volts;
use crate::params::{CalParams, GRAMS_PER_KG};
use crate::pedal::calibrate::{run_command, Outcome, ProcCtx, SessionState, RESUME_SETTLE};
use crate::pedal::sim::{SimMode, SineSource, StepSource};
use crate::pedal::ForceSensor;
use crate::shared::SharedState;

/// How long startup waits for the sensor before declaring the hardware dead.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Verbose report throttle.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Cadence of the simulated sources, matching the HX711-class conversion
/// rate the real pedal samples at.
pub const SIM_CADENCE: Duration = Duration::from_hz(89);

/// A fault that must halt the device before it ever drives the output.
/// Points at wiring, not at software; there is no retry.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartupError {
    /// No conversion arrived inside the startup window.
    Acquisition,
    /// The zero offset never settled.
    Tare,
}

/// The operator asked for a reboot; the board owns the actual reset.
#[derive(Debug)]
pub struct RebootRequest;

async fn startup<S: ForceSensor, F: StoreBackend>(
    sensor: &mut S,
    store: &mut ParamStore<F>,
    dialog: &Dialog<'_>,
) -> Result<CalParams, StartupError> {
    dialog.say("starting up").await;

    if with_timeout(STARTUP_TIMEOUT, sensor.update()).await.is_err() {
        dialog
            .say("no data from the load cell; check wiring and pin assignments")
            .await;
        crate::error!("load cell produced no conversion during startup");
        return Err(StartupError::Acquisition);
    }

    sensor.tare();
    let tared = with_timeout(STARTUP_TIMEOUT, async {
        loop {
            sensor.update().await;
            if sensor.tare_done() {
                break;
            }
        }
    })
    .await;
    if tared.is_err() {
        dialog
            .say("tare never finished; check wiring and pin assignments")
            .await;
        crate::error!("startup tare timed out");
        return Err(StartupError::Tare);
    }

    let params = store.load();
    sensor.set_scale(params.reference_scale);
    crate::info!("startup complete");
    dialog.say("startup complete").await;
    Ok(params)
}

/// One verbose report line: count, force, code(s) with derived voltage, and
/// the duty split when dithering.
pub(crate) fn report_line(count: u32, force: f32, directive: &Directive, window: u8) -> Message {
    let mut line = Message::new();
    let _ = match *directive {
        Directive::Single(code) => write!(
            line,
            "{} force {:.2} kg  out {} ({:.2} V)",
            count,
            force / GRAMS_PER_KG,
            code,
            code_volts(code)
        ),
        Directive::Dither {
            lower_code,
            upper_code,
            upper_cycles,
            ..
        } => write!(
            line,
            "{} force {:.2} kg  out {}~{} ({:.2} V)  duty {}/{}",
            count,
            force / GRAMS_PER_KG,
            lower_code,
            upper_code,
            code_volts(lower_code),
            upper_cycles,
            window
        ),
    };
    line
}

/// Run the pedal until the operator asks for a reboot. A startup fault
/// returns instead; the board should surface it and halt.
pub async fn run<S: ForceSensor, F: StoreBackend>(
    mut sensor: S,
    mut store: ParamStore<F>,
    mut dialog: Dialog<'_>,
    shared: &SharedState,
    tuning: Tuning,
) -> Result<RebootRequest, StartupError> {
    let mut params = startup(&mut sensor, &mut store, &dialog).await?;

    let mut verbose = false;
    let mut sim_mode = SimMode::Off;
    let mut sine = SineSource::new();
    let mut steps = StepSource::new();
    let mut session = SessionState::Idle;
    let mut sample_count: u32 = 0;
    let mut last_report = Instant::now();

    loop {
        let next_sample = async {
            match sim_mode {
                SimMode::Off => {
                    sensor.update().await;
                    sensor.get_data()
                }
                SimMode::Sine => {
                    Timer::after(SIM_CADENCE).await;
                    sine.next(&params)
                }
                SimMode::Steps => {
                    Timer::after(SIM_CADENCE).await;
                    steps.next(&params)
                }
            }
        };

        match select(dialog.next_line(), next_sample).await {
            Either::First(line) => match console::parse_command(&line) {
                Some(command) => {
                    let mut cx = ProcCtx {
                        dialog: &mut dialog,
                        sensor: &mut sensor,
                        store: &mut store,
                        params: &mut params,
                        shared,
                        verbose: &mut verbose,
                        sim: &mut sim_mode,
                        state: &mut session,
                    };
                    if let Outcome::Reboot = run_command(command, &mut cx, RESUME_SETTLE).await {
                        crate::info!("reboot requested from console");
                        return Ok(RebootRequest);
                    }
                }
                None => {
                    dialog
                        .say("unknown command; one of: tare, cal, vcal, refmass, limits, mode, verbose, sim, show, load, save, reboot")
                        .await;
                }
            },
            Either::Second(raw) => {
                // Clamp by hand: a half-finished calibration can leave the
                // span inverted in RAM, which must not take the loop down.
                let clamped = raw.min(params.max_force).max(params.min_force);
                sample_count = sample_count.wrapping_add(1);
                let directive = mapping::map(clamped, &params, &tuning);
                shared.publish(directive, params.run_mode(), sample_count);

                if verbose && last_report.elapsed() >= REPORT_INTERVAL {
                    last_report = Instant::now();
                    dialog.report(report_line(
                        sample_count,
                        clamped,
                        &directive,
                        tuning.dither_window,
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonvolatile::testutil::MockFlash;
    use crate::pedal::testutil::ScriptSensor;
    use crate::{LineChannel, MessageBus};
    use embassy_futures::block_on;

    #[test]
    fn report_lines_read_like_the_wire_format() {
        let single = report_line(12, 15_500.0, &Directive::Single(180), 10);
        assert_eq!(single.as_str(), "12 force 15.50 kg  out 180 (2.33 V)");

        let dither = report_line(
            3,
            10_000.0,
            &Directive::Dither {
                lower_code: 100,
                upper_code: 101,
                lower_cycles: 4,
                upper_cycles: 6,
            },
            10,
        );
        assert_eq!(
            dither.as_str(),
            "3 force 10.00 kg  out 100~101 (1.29 V)  duty 6/10"
        );
    }

    #[test]
    fn startup_loads_and_applies_stored_parameters() {
        let lines = LineChannel::new();
        let bus = MessageBus::new();
        let dialog = Dialog::new(lines.receiver(), bus.dyn_publisher().unwrap());

        let mut store = ParamStore::new(MockFlash::blank());
        let saved = CalParams {
            reference_scale: 7.5,
            ..CalParams::default()
        };
        block_on(store.save(&saved));

        let mut sensor = ScriptSensor::with(&[0.0, 0.0]);
        let params = block_on(startup(&mut sensor, &mut store, &dialog)).unwrap();
        assert_eq!(params, saved);
        assert_eq!(sensor.scale, 7.5);
        assert_eq!(sensor.tares, 1);
    }
}
