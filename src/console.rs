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

//! Plain-text operator consoles. Each transport gets a pump that turns
//! inbound bytes into whole lines for the control task and fans outbound
//! messages back out, so calibration dialog shows up on every attached
//! console at once.

use arrayvec::ArrayString;
use core::fmt::Write;
use embassy_futures::select::{select, Either};
use embassy_sync::pubsub::{DynPublisher, DynSubscriber, WaitResult};

use crate::{LineReceiver, LineSender};

pub const LINE_CAP: usize = 64;
pub const MESSAGE_CAP: usize = 120;

/// One inbound console line, already stripped of line endings.
pub type Line = ArrayString<LINE_CAP>;
/// One outbound text line.
pub type Message = ArrayString<MESSAGE_CAP>;

/// Sentinel replies inside numeric prompts.
pub const SENTINEL_KEEP: f32 = -1.0;
pub const SENTINEL_ACCEPT: f32 = -2.0;

/// A byte-stream console (UART, BT serial, USB CDC, ...). `read` resolves
/// with at least one byte; `write_all` may buffer but must preserve order.
pub trait Transport {
    async fn read(&mut self, buf: &mut [u8]) -> usize;
    async fn write_all(&mut self, bytes: &[u8]);
}

/// Top-level command vocabulary. The single letters are kept from the
/// original serial protocol as aliases.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Tare,
    Calibrate,
    OutputRange,
    ReferenceMass,
    Limits,
    ModeToggle,
    VerboseToggle,
    SimSource,
    Show,
    Load,
    Save,
    Reboot,
}

const COMMANDS: &[(&str, &str, Command)] = &[
    ("tare", "t", Command::Tare),
    ("cal", "c", Command::Calibrate),
    ("vcal", "v", Command::OutputRange),
    ("refmass", "w", Command::ReferenceMass),
    ("limits", "l", Command::Limits),
    ("mode", "n", Command::ModeToggle),
    ("verbose", "s", Command::VerboseToggle),
    ("sim", "i", Command::SimSource),
    ("show", "a", Command::Show),
    ("load", "e", Command::Load),
    ("save", "", Command::Save),
    ("reboot", "r", Command::Reboot),
];

pub fn parse_command(line: &str) -> Option<Command> {
    let word = line.trim();
    if word.is_empty() {
        return None;
    }
    COMMANDS
        .iter()
        .find(|(name, alias, _)| {
            word.eq_ignore_ascii_case(name) || (!alias.is_empty() && word.eq_ignore_ascii_case(alias))
        })
        .map(|&(_, _, command)| command)
}

/// y/n replies inside procedures. `n` only means "no" here; at the top level
/// it is the mode-toggle alias.
pub fn parse_yes_no(line: &str) -> Option<bool> {
    let word = line.trim();
    if word.eq_ignore_ascii_case("y") || word.eq_ignore_ascii_case("yes") {
        Some(true)
    } else if word.eq_ignore_ascii_case("n") || word.eq_ignore_ascii_case("no") {
        Some(false)
    } else {
        None
    }
}

pub fn parse_number(line: &str) -> Option<f32> {
    line.trim().parse().ok()
}

/// Pump one transport: bytes in, lines out to the control task; messages in,
/// text out to the operator. Overlong lines are dropped whole rather than
/// split into surprise commands.
pub async fn pump<T: Transport>(
    mut transport: T,
    lines: LineSender<'_>,
    mut messages: DynSubscriber<'_, Message>,
) -> ! {
    let mut buf = [0u8; 32];
    let mut line = Line::new();
    let mut overflowed = false;
    loop {
        match select(transport.read(&mut buf), messages.next_message()).await {
            Either::First(n) => {
                for &byte in &buf[..n] {
                    match byte {
                        b'\r' => {}
                        b'\n' => {
                            if !line.is_empty() && !overflowed {
                                lines.send(line).await;
                            }
                            line.clear();
                            overflowed = false;
                        }
                        _ if byte.is_ascii() => {
                            if line.try_push(char::from(byte)).is_err() {
                                crate::warn!("console line too long, dropping it");
                                line.clear();
                                overflowed = true;
                            }
                        }
                        _ => {}
                    }
                }
            }
            Either::Second(WaitResult::Message(message)) => {
                transport.write_all(message.as_bytes()).await;
                transport.write_all(b"\r\n").await;
            }
            Either::Second(WaitResult::Lagged(count)) => {
                crate::warn!("console fell behind, {} message(s) dropped", count);
            }
        }
    }
}

/// The control task's end of the console plumbing: one line stream in, one
/// broadcast stream out. Only calibration procedures ever block on `next_line`.
pub struct Dialog<'a> {
    lines: LineReceiver<'a>,
    out: DynPublisher<'a, Message>,
}

impl<'a> Dialog<'a> {
    pub fn new(lines: LineReceiver<'a>, out: DynPublisher<'a, Message>) -> Self {
        Self { lines, out }
    }

    pub async fn say(&self, text: &str) {
        let mut message = Message::new();
        let _ = message.try_push_str(text);
        self.out.publish(message).await;
    }

    pub async fn sayf(&self, args: core::fmt::Arguments<'_>) {
        let mut message = Message::new();
        let _ = message.write_fmt(args);
        self.out.publish(message).await;
    }

    /// Lossy publish for periodic reports; never blocks the sampling loop.
    pub fn report(&self, message: Message) {
        self.out.publish_immediate(message);
    }

    pub async fn next_line(&mut self) -> Line {
        self.lines.receive().await
    }

    /// Prompt once, then insist on a y/n reply.
    pub async fn ask_yes_no(&mut self, prompt: &str) -> bool {
        self.say(prompt).await;
        loop {
            let line = self.next_line().await;
            match parse_yes_no(&line) {
                Some(answer) => return answer,
                None => self.say("send 'y' or 'n'").await,
            }
        }
    }

    /// Prompt once, then insist on a number. Range checks stay with the
    /// caller, which knows the sentinels in play.
    pub async fn ask_number(&mut self, prompt: &str) -> f32 {
        self.say(prompt).await;
        loop {
            let line = self.next_line().await;
            match parse_number(&line) {
                Some(value) => return value,
                None => self.say("enter a decimal number").await,
            }
        }
    }
}
