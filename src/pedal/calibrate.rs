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

//! Interactive calibration, run on the sampling task. Every procedure
//! follows the same shape: pause the output driver, talk to the operator
//! over the console, and only touch flash after an explicit confirmation.
//! Discarding always leaves the store as it was.

use embassy_time::{Duration, Timer};

use crate::console::{self, Command, Dialog, SENTINEL_ACCEPT, SENTINEL_KEEP};
use crate::mapping::Directive;
use crate::nonvolatile::{ParamStore, StoreBackend};
use crate::output::code_volts;
use crate::params::{CalParams, GAMMA_MAX, GAMMA_MIN, GRAMS_PER_KG};
use crate::pedal::sim::SimMode;
use crate::pedal::ForceSensor;
use crate::shared::{Mode, SharedState};

/// Grace period before normal sampling resumes after a procedure, giving
/// the operator time to let go of the pedal.
pub const RESUME_SETTLE: Duration = Duration::from_secs(3);

const REBOOT_NOTICE: Duration = Duration::from_secs(2);

/// A captured minimum is rejected unless it sits at or below this share of
/// the captured maximum.
pub const MIN_CAPTURE_GUARD: f32 = 0.9;

/// Numeric limit entry aborts unless the minimum stays under this share of
/// the maximum.
pub const LIMITS_GUARD: f32 = 0.8;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Idle,
    /// A procedure owns the console; the output driver holds its last code.
    PausedInteractive,
    /// Procedure finished, waiting out the settle delay.
    Resuming,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    Done,
    /// The caller should reset the device.
    Reboot,
}

/// Everything a procedure may touch, borrowed from the sampling task for
/// the duration of one command.
pub struct ProcCtx<'a, 'b, S, F> {
    pub dialog: &'a mut Dialog<'b>,
    pub sensor: &'a mut S,
    pub store: &'a mut ParamStore<F>,
    pub params: &'a mut CalParams,
    pub shared: &'a SharedState,
    pub verbose: &'a mut bool,
    pub sim: &'a mut SimMode,
    pub state: &'a mut SessionState,
}

/// Dispatch one console command through the pause/resume protocol.
pub async fn run_command<S: ForceSensor, F: StoreBackend>(
    command: Command,
    cx: &mut ProcCtx<'_, '_, S, F>,
    settle: Duration,
) -> Outcome {
    // The driver must see the pause before any blocking console I/O.
    cx.shared.set_mode(Mode::Paused);
    *cx.state = SessionState::PausedInteractive;
    crate::debug!("calibration session opened");

    let outcome = match command {
        Command::Tare => {
            tare(cx).await;
            Outcome::Done
        }
        Command::Calibrate => {
            force_calibration(cx).await;
            Outcome::Done
        }
        Command::OutputRange => {
            output_range(cx).await;
            Outcome::Done
        }
        Command::ReferenceMass => {
            reference_mass(cx).await;
            Outcome::Done
        }
        Command::Limits => {
            limits_entry(cx).await;
            Outcome::Done
        }
        Command::ModeToggle => {
            mode_toggle(cx).await;
            Outcome::Done
        }
        Command::VerboseToggle => {
            verbose_toggle(cx).await;
            Outcome::Done
        }
        Command::SimSource => {
            sim_source(cx).await;
            Outcome::Done
        }
        Command::Show => {
            dump_params(cx, "RAM parameters").await;
            Outcome::Done
        }
        Command::Load => {
            *cx.params = cx.store.load();
            cx.sensor.set_scale(cx.params.reference_scale);
            dump_params(cx, "stored parameters").await;
            Outcome::Done
        }
        Command::Save => {
            confirm_save(cx).await;
            Outcome::Done
        }
        Command::Reboot => {
            cx.dialog.say("rebooting").await;
            Timer::after(REBOOT_NOTICE).await;
            Outcome::Reboot
        }
    };

    *cx.state = SessionState::Resuming;
    Timer::after(settle).await;
    cx.shared.set_mode(cx.params.run_mode());
    *cx.state = SessionState::Idle;
    crate::debug!("calibration session closed");
    outcome
}

/// Zero the sensor on the current load. Blocks until the driver reports
/// completion; the sensor keeps being fed meanwhile.
pub async fn tare<S: ForceSensor, F>(cx: &mut ProcCtx<'_, '_, S, F>) {
    cx.dialog.say("tare started, keep the pedal untouched").await;
    cx.sensor.tare();
    loop {
        cx.sensor.update().await;
        if cx.sensor.tare_done() {
            break;
        }
    }
    cx.dialog.say("tare finished").await;
}

/// Wait for y/n; on yes, capture a fresh reading.
async fn capture_current<S: ForceSensor, F>(cx: &mut ProcCtx<'_, '_, S, F>) -> Option<f32> {
    loop {
        let line = cx.dialog.next_line().await;
        match console::parse_yes_no(&line) {
            Some(true) => {
                cx.sensor.update().await;
                return Some(cx.sensor.get_data());
            }
            Some(false) => return None,
            None => cx.dialog.say("send 'y' or 'n'").await,
        }
    }
}

/// Capture the force extremes under the operator's foot.
pub async fn force_calibration<S: ForceSensor, F: StoreBackend>(cx: &mut ProcCtx<'_, '_, S, F>) {
    tare(cx).await;
    cx.sensor.refresh_dataset().await;

    cx.dialog
        .say("push the pedal to maximum braking, then 'y' to capture it ('n' keeps the stored value)")
        .await;
    if let Some(force) = capture_current(cx).await {
        cx.params.max_force = force;
    }

    cx.dialog
        .say("ease off to the resting position, then 'y' to capture it ('n' keeps the stored value)")
        .await;
    loop {
        match capture_current(cx).await {
            None => break,
            Some(force) if force <= MIN_CAPTURE_GUARD * cx.params.max_force => {
                cx.params.min_force = force;
                break;
            }
            Some(_) => {
                cx.dialog
                    .say("too close to the maximum braking point, try again with less force")
                    .await;
            }
        }
    }

    reduction_entry(cx).await;
    dump_params(cx, "captured parameters").await;
    confirm_save(cx).await;
}

async fn reduction_entry<S, F>(cx: &mut ProcCtx<'_, '_, S, F>) {
    cx.dialog
        .sayf(format_args!(
            "reduction factor is {} %",
            cx.params.reduction_pct
        ))
        .await;
    loop {
        let value = cx
            .dialog
            .ask_number("new factor in percent, over 0 up to 100 ('-1' keeps it)")
            .await;
        if value == SENTINEL_KEEP {
            break;
        }
        if value > 0.0 && value <= 100.0 {
            cx.params.reduction_pct = value;
            break;
        }
        cx.dialog.say("the factor must be above 0 and at most 100").await;
    }
}

/// Numeric entry of the force limits, for when the span is known without
/// stepping on the pedal.
pub async fn limits_entry<S: ForceSensor, F: StoreBackend>(cx: &mut ProcCtx<'_, '_, S, F>) {
    cx.sensor.refresh_dataset().await;
    let mut max_force = cx.params.max_force;
    let mut min_force = cx.params.min_force;

    cx.dialog
        .sayf(format_args!(
            "maximum braking force is {:.2} kg",
            max_force / GRAMS_PER_KG
        ))
        .await;
    loop {
        let value = cx
            .dialog
            .ask_number("new maximum in kg (example: 15.23), '-1' keeps it")
            .await;
        if value == SENTINEL_KEEP {
            break;
        }
        if value > 0.0 {
            max_force = value * GRAMS_PER_KG;
            break;
        }
        cx.dialog.say("the force must be above zero").await;
    }

    cx.dialog
        .sayf(format_args!(
            "minimum braking force is {:.2} kg",
            min_force / GRAMS_PER_KG
        ))
        .await;
    loop {
        let value = cx
            .dialog
            .ask_number("new minimum in kg, greater than zero, '-1' keeps it")
            .await;
        if value == SENTINEL_KEEP {
            break;
        }
        if value > 0.0 {
            min_force = value * GRAMS_PER_KG;
            break;
        }
        cx.dialog.say("the force must be above zero").await;
    }

    if min_force < LIMITS_GUARD * max_force {
        cx.params.max_force = max_force;
        cx.params.min_force = min_force;
        reduction_entry(cx).await;
        dump_params(cx, "entered parameters").await;
        confirm_save(cx).await;
    } else {
        cx.dialog
            .say("the minimum sits too close to the maximum; nothing changed")
            .await;
    }
}

/// Find the output codes the console actually reacts to, by driving them
/// live and watching the game's pedal readout.
pub async fn output_range<S: ForceSensor, F: StoreBackend>(cx: &mut ProcCtx<'_, '_, S, F>) {
    cx.shared.override_directive(Directive::Single(0), Mode::Raw);
    let stored_max = cx.params.max_code;
    if let Some(code) = sweep(cx, "100 % braking", stored_max).await {
        cx.params.max_code = code;
    }
    cx.shared.override_directive(Directive::Single(0), Mode::Raw);
    let stored_min = cx.params.min_code;
    if let Some(code) = sweep(cx, "0 % braking", stored_min).await {
        cx.params.min_code = code;
    }
    cx.shared.override_directive(Directive::Single(0), Mode::Raw);

    dump_params(cx, "entered parameters").await;
    confirm_save(cx).await;
}

async fn sweep<S, F>(cx: &mut ProcCtx<'_, '_, S, F>, label: &str, current: u8) -> Option<u8> {
    cx.dialog
        .sayf(format_args!(
            "{} now drives code {} ({:.2} V)",
            label,
            current,
            code_volts(current)
        ))
        .await;
    cx.dialog
        .say("enter 0-255 to drive the output live, '-2' accepts the last driven code, '-1' keeps the stored one")
        .await;
    let mut last_driven: Option<u8> = None;
    loop {
        let value = cx.dialog.ask_number("code?").await;
        if value == SENTINEL_ACCEPT {
            if last_driven.is_some() {
                return last_driven;
            }
            cx.dialog.say("nothing driven yet").await;
        } else if value == SENTINEL_KEEP {
            return None;
        } else if (0.0..=255.0).contains(&value) {
            let code = value as u8;
            last_driven = Some(code);
            cx.shared.override_directive(Directive::Single(code), Mode::Raw);
            cx.dialog
                .sayf(format_args!("driving {} ({:.2} V)", code, code_volts(code)))
                .await;
        } else {
            cx.dialog.say("codes run 0-255").await;
        }
    }
}

/// One-time derivation of the counts-to-grams scale from a known mass.
pub async fn reference_mass<S: ForceSensor, F: StoreBackend>(cx: &mut ProcCtx<'_, '_, S, F>) {
    cx.dialog
        .say("reference-mass calibration derives the grams-per-count scale; normally a one-time step")
        .await;
    if !cx
        .dialog
        .ask_yes_no("remove any load from the pedal, then 'y' to tare ('n' aborts)")
        .await
    {
        cx.dialog.say("aborted, nothing changed").await;
        return;
    }
    tare(cx).await;

    loop {
        let value = cx
            .dialog
            .ask_number("place the reference mass and enter it in grams (example: 1234), '-1' aborts")
            .await;
        if value == SENTINEL_KEEP {
            cx.dialog.say("aborted, nothing changed").await;
            return;
        }
        if value > 0.0 {
            cx.sensor.refresh_dataset().await;
            let scale = cx.sensor.derive_scale(value);
            cx.params.reference_scale = scale;
            cx.dialog
                .sayf(format_args!("new scale factor: {}", scale))
                .await;
            confirm_save(cx).await;
            return;
        }
        cx.dialog.say("the mass must be positive").await;
    }
}

/// Switch between raw and normalized mapping; enabling the curve also
/// offers the gamma exponent.
pub async fn mode_toggle<S: ForceSensor, F: StoreBackend>(cx: &mut ProcCtx<'_, '_, S, F>) {
    let enable = cx
        .dialog
        .ask_yes_no("normalize through the reference curve? ('y' = curve, 'n' = raw linear)")
        .await;
    cx.params.linearize = enable;
    if enable {
        cx.dialog
            .sayf(format_args!(
                "gamma is {} (above 1.0 holds strong braking longer)",
                cx.params.gamma
            ))
            .await;
        loop {
            let value = cx
                .dialog
                .ask_number("new gamma, 0.25 to 4.0, '-1' keeps it")
                .await;
            if value == SENTINEL_KEEP {
                break;
            }
            if (GAMMA_MIN..=GAMMA_MAX).contains(&value) {
                cx.params.gamma = value;
                break;
            }
            cx.dialog.say("gamma must lie within 0.25 and 4.0").await;
        }
    }
    confirm_save(cx).await;
}

async fn verbose_toggle<S, F>(cx: &mut ProcCtx<'_, '_, S, F>) {
    *cx.verbose = cx.dialog.ask_yes_no("report sample data? ('y'/'n')").await;
    cx.dialog
        .say(if *cx.verbose {
            "reporting on"
        } else {
            "reporting off"
        })
        .await;
}

pub async fn sim_source<S, F>(cx: &mut ProcCtx<'_, '_, S, F>) {
    cx.dialog
        .say("input source: 0 = load cell, 1 = sine sweep, 2 = step curve, '-1' keeps it")
        .await;
    loop {
        let value = cx.dialog.ask_number("source?").await;
        if value == SENTINEL_KEEP {
            break;
        }
        *cx.sim = match value {
            v if v == 0.0 => SimMode::Off,
            v if v == 1.0 => SimMode::Sine,
            v if v == 2.0 => SimMode::Steps,
            _ => {
                cx.dialog.say("sources are 0, 1 or 2").await;
                continue;
            }
        };
        break;
    }
    cx.dialog
        .sayf(format_args!("input source: {}", cx.sim.describe()))
        .await;
}

async fn dump_params<S, F>(cx: &ProcCtx<'_, '_, S, F>, heading: &str) {
    let params = *cx.params;
    cx.dialog.sayf(format_args!("*** {} ***", heading)).await;
    cx.dialog
        .sayf(format_args!(
            "max force: {:.2} kg",
            params.max_force / GRAMS_PER_KG
        ))
        .await;
    cx.dialog
        .sayf(format_args!(
            "min force: {:.2} kg",
            params.min_force / GRAMS_PER_KG
        ))
        .await;
    cx.dialog
        .sayf(format_args!("reduction factor: {} %", params.reduction_pct))
        .await;
    cx.dialog
        .sayf(format_args!(
            "output codes: {} at 0 % ({:.2} V), {} at 100 % ({:.2} V)",
            params.min_code,
            code_volts(params.min_code),
            params.max_code,
            code_volts(params.max_code)
        ))
        .await;
    cx.dialog
        .sayf(format_args!("scale factor: {}", params.reference_scale))
        .await;
    cx.dialog
        .sayf(format_args!(
            "mapping: {}, gamma: {}",
            if params.linearize { "curve" } else { "raw" },
            params.gamma
        ))
        .await;
}

/// The one place the store gets written, and only past a 'y'.
async fn confirm_save<S, F: StoreBackend>(cx: &mut ProcCtx<'_, '_, S, F>) {
    if !cx
        .dialog
        .ask_yes_no("save parameters to flash? ('y'/'n')")
        .await
    {
        cx.dialog.say("not saved").await;
        return;
    }
    if let Err(error) = cx.params.validate() {
        cx.dialog
            .sayf(format_args!("refusing to save: {}", error.describe()))
            .await;
        return;
    }
    cx.store.save(cx.params).await;
    cx.dialog.say("saved").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Line;
    use crate::nonvolatile::testutil::MockFlash;
    use crate::pedal::testutil::ScriptSensor;
    use crate::{LineChannel, MessageBus};
    use embassy_futures::block_on;
    use embassy_futures::join::join;

    struct Rig {
        lines: LineChannel,
        bus: MessageBus,
        sensor: ScriptSensor,
        store: ParamStore<MockFlash>,
        params: CalParams,
        shared: SharedState,
        verbose: bool,
        sim: SimMode,
        state: SessionState,
    }

    impl Rig {
        fn new(readings: &[f32]) -> Self {
            Self {
                lines: LineChannel::new(),
                bus: MessageBus::new(),
                sensor: ScriptSensor::with(readings),
                store: ParamStore::new(MockFlash::blank()),
                params: CalParams::default(),
                shared: SharedState::new(),
                verbose: false,
                sim: SimMode::Off,
                state: SessionState::Idle,
            }
        }
    }

    /// Run one procedure against a scripted console. The script must match
    /// the procedure's appetite exactly or the join never finishes.
    macro_rules! run_scripted {
        ($rig:ident, $script:expr, $proc:ident) => {{
            let mut dialog = Dialog::new($rig.lines.receiver(), $rig.bus.dyn_publisher().unwrap());
            let mut cx = ProcCtx {
                dialog: &mut dialog,
                sensor: &mut $rig.sensor,
                store: &mut $rig.store,
                params: &mut $rig.params,
                shared: &$rig.shared,
                verbose: &mut $rig.verbose,
                sim: &mut $rig.sim,
                state: &mut $rig.state,
            };
            let feeder = async {
                for text in $script {
                    $rig.lines.sender().send(Line::from(text).unwrap()).await;
                }
            };
            block_on(join($proc(&mut cx), feeder));
        }};
    }

    #[test]
    fn force_calibration_captures_both_extremes() {
        let mut rig = Rig::new(&[0.0, 30_000.0, 29_000.0, 2_000.0]);
        run_scripted!(rig, ["y", "y", "y", "-1", "n"], force_calibration);
        assert_eq!(rig.params.max_force, 30_000.0);
        assert_eq!(rig.params.min_force, 2_000.0);
        assert_eq!(rig.params.reduction_pct, 100.0);
        // Declined to persist: the store still reads back defaults.
        assert_eq!(rig.store.load(), CalParams::default());
    }

    #[test]
    fn min_capture_near_max_is_rejected_and_leaves_params_alone() {
        // Default max is 20 kg; 19 kg is above the 90 % guard.
        let mut rig = Rig::new(&[0.0, 19_000.0]);
        run_scripted!(rig, ["n", "y", "n", "-1", "n"], force_calibration);
        assert_eq!(rig.params, CalParams::default());
        assert_eq!(rig.store.load(), CalParams::default());
    }

    #[test]
    fn confirmed_force_calibration_persists() {
        let mut rig = Rig::new(&[0.0, 30_000.0, 2_000.0]);
        run_scripted!(rig, ["y", "y", "80", "y"], force_calibration);
        assert_eq!(rig.params.reduction_pct, 80.0);
        assert_eq!(rig.store.load(), rig.params);
    }

    #[test]
    fn output_sweep_drives_codes_and_accepts_the_last_one() {
        let mut rig = Rig::new(&[]);
        run_scripted!(rig, ["190", "200", "-2", "-1", "n"], output_range);
        assert_eq!(rig.params.max_code, 200);
        assert_eq!(rig.params.min_code, CalParams::default().min_code);
        // The sweep parks the output at code 0 when it is done.
        let state = rig.shared.snapshot();
        assert_eq!(state.directive, Directive::Single(0));
        assert_eq!(state.mode, Mode::Raw);
        assert_eq!(rig.store.load(), CalParams::default());
    }

    #[test]
    fn out_of_range_sweep_entries_reprompt() {
        let mut rig = Rig::new(&[]);
        run_scripted!(rig, ["300", "-1", "-1", "n"], output_range);
        assert_eq!(rig.params, CalParams::default());
    }

    #[test]
    fn reference_mass_applies_and_persists_the_scale() {
        let mut rig = Rig::new(&[0.0]);
        run_scripted!(rig, ["y", "1234", "y"], reference_mass);
        assert_eq!(rig.params.reference_scale, 0.1234);
        assert_eq!(rig.sensor.scale, 0.1234);
        assert_eq!(rig.store.load(), rig.params);
        assert_eq!(rig.sensor.tares, 1);
    }

    #[test]
    fn limits_entry_aborts_when_min_crowds_max() {
        let mut rig = Rig::new(&[]);
        run_scripted!(rig, ["10", "9"], limits_entry);
        assert_eq!(rig.params, CalParams::default());
        assert_eq!(rig.store.load(), CalParams::default());
    }

    #[test]
    fn limits_entry_converts_kilograms() {
        let mut rig = Rig::new(&[]);
        run_scripted!(rig, ["25.5", "1.5", "-1", "y"], limits_entry);
        assert_eq!(rig.params.max_force, 25_500.0);
        assert_eq!(rig.params.min_force, 1_500.0);
        assert_eq!(rig.store.load(), rig.params);
    }

    #[test]
    fn mode_toggle_prompts_gamma_only_when_enabling() {
        let mut rig = Rig::new(&[]);
        run_scripted!(rig, ["y", "2.0", "y"], mode_toggle);
        assert!(rig.params.linearize);
        assert_eq!(rig.params.gamma, 2.0);
        assert_eq!(rig.store.load(), rig.params);

        let mut rig = Rig::new(&[]);
        run_scripted!(rig, ["n", "n"], mode_toggle);
        assert!(!rig.params.linearize);
        assert_eq!(rig.params.gamma, 1.0);
    }

    #[test]
    fn gamma_outside_range_reprompts() {
        let mut rig = Rig::new(&[]);
        run_scripted!(rig, ["y", "9.0", "0.5", "n"], mode_toggle);
        assert_eq!(rig.params.gamma, 0.5);
        assert_eq!(rig.store.load(), CalParams::default());
    }

    #[test]
    fn sim_toggle_switches_the_source() {
        let mut rig = Rig::new(&[]);
        run_scripted!(rig, ["2"], sim_source);
        assert_eq!(rig.sim, SimMode::Steps);

        let mut rig = Rig::new(&[]);
        run_scripted!(rig, ["-1"], sim_source);
        assert_eq!(rig.sim, SimMode::Off);
    }

    #[test]
    fn invalid_params_refuse_to_persist() {
        // A max below the stored min, with the min capture skipped.
        let mut rig = Rig::new(&[0.0, 900.0]);
        run_scripted!(rig, ["y", "n", "-1", "y"], force_calibration);
        assert_eq!(rig.params.max_force, 900.0);
        assert_eq!(rig.store.load(), CalParams::default());
    }

    #[test]
    fn command_wrapper_walks_the_session_states() {
        let mut rig = Rig::new(&[0.0]);
        let mut dialog = Dialog::new(rig.lines.receiver(), rig.bus.dyn_publisher().unwrap());
        let mut cx = ProcCtx {
            dialog: &mut dialog,
            sensor: &mut rig.sensor,
            store: &mut rig.store,
            params: &mut rig.params,
            shared: &rig.shared,
            verbose: &mut rig.verbose,
            sim: &mut rig.sim,
            state: &mut rig.state,
        };
        let outcome = block_on(run_command(
            Command::Tare,
            &mut cx,
            Duration::from_ticks(0),
        ));
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(rig.state, SessionState::Idle);
        // Default parameters run normalized; the wrapper restored that.
        assert_eq!(rig.shared.mode(), Mode::Normalized);
    }
}
