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

//! Free-running renderer of the latest directive onto the physical output.
//! Runs at its own cadence; it only ever copies the shared state and never
//! waits on the sampling side.

use embassy_futures::yield_now;

use crate::mapping::Directive;
use crate::shared::{Mode, SharedState};

/// Volts per output code on a 3.3 V, 8-bit DAC. Only used for operator
/// readouts; the hardware consumes codes.
pub const VOLTS_PER_CODE: f32 = 3.3 / 255.0;

/// The voltage a code lands on, for prompts and reports.
pub fn code_volts(code: u8) -> f32 {
    f32::from(code) * VOLTS_PER_CODE
}

/// The physical analog output. `emit_code` latches one code and must return
/// without blocking; it is called once per dithering sub-step.
pub trait BrakeDac {
    fn emit_code(&mut self, code: u8);
}

/// Render one directive for one window.
///
/// The block with fewer cycles is emitted first; equal counts alternate per
/// step starting from the lower code.
fn render<D: BrakeDac>(dac: &mut D, directive: &Directive) {
    match *directive {
        Directive::Single(code) => dac.emit_code(code),
        Directive::Dither {
            lower_code,
            upper_code,
            lower_cycles,
            upper_cycles,
        } => {
            if lower_cycles == upper_cycles {
                let steps = u16::from(lower_cycles) + u16::from(upper_cycles);
                for step in 0..steps {
                    if step % 2 == 0 {
                        dac.emit_code(lower_code);
                    } else {
                        dac.emit_code(upper_code);
                    }
                }
            } else if lower_cycles < upper_cycles {
                for _ in 0..lower_cycles {
                    dac.emit_code(lower_code);
                }
                for _ in 0..upper_cycles {
                    dac.emit_code(upper_code);
                }
            } else {
                for _ in 0..upper_cycles {
                    dac.emit_code(upper_code);
                }
                for _ in 0..lower_cycles {
                    dac.emit_code(lower_code);
                }
            }
        }
    }
}

/// Drive the output until the end of time. Yields to the executor after
/// every window so the sampling task is never starved.
pub async fn run<D: BrakeDac>(mut dac: D, shared: &SharedState) -> ! {
    let mut last_count = 0u32;
    loop {
        let state = shared.snapshot();
        let gap = state.sample_count.wrapping_sub(last_count);
        if gap > 1 {
            crate::warn!("output driver missed {} sample(s)", gap - 1);
        }
        last_count = state.sample_count;
        if state.mode != Mode::Paused {
            render(&mut dac, &state.directive);
        }
        yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingDac {
        codes: Vec<u8>,
    }

    impl BrakeDac for RecordingDac {
        fn emit_code(&mut self, code: u8) {
            self.codes.push(code);
        }
    }

    fn rendered(directive: Directive) -> Vec<u8> {
        let mut dac = RecordingDac::default();
        render(&mut dac, &directive);
        dac.codes
    }

    #[test]
    fn single_code_is_emitted_once() {
        assert_eq!(rendered(Directive::Single(180)), vec![180]);
    }

    #[test]
    fn smaller_block_is_emitted_first() {
        let codes = rendered(Directive::Dither {
            lower_code: 100,
            upper_code: 101,
            lower_cycles: 8,
            upper_cycles: 2,
        });
        assert_eq!(codes, vec![101, 101, 100, 100, 100, 100, 100, 100, 100, 100]);

        let codes = rendered(Directive::Dither {
            lower_code: 100,
            upper_code: 101,
            lower_cycles: 3,
            upper_cycles: 7,
        });
        assert_eq!(codes, vec![100, 100, 100, 101, 101, 101, 101, 101, 101, 101]);
    }

    #[test]
    fn equal_blocks_alternate_lower_first() {
        let codes = rendered(Directive::Dither {
            lower_code: 40,
            upper_code: 41,
            lower_cycles: 5,
            upper_cycles: 5,
        });
        assert_eq!(codes, vec![40, 41, 40, 41, 40, 41, 40, 41, 40, 41]);
    }

    #[test]
    fn window_length_matches_the_cycle_counts() {
        let codes = rendered(Directive::Dither {
            lower_code: 10,
            upper_code: 11,
            lower_cycles: 6,
            upper_cycles: 4,
        });
        assert_eq!(codes.len(), 10);
        assert_eq!(codes.iter().filter(|&&c| c == 10).count(), 6);
        assert_eq!(codes.iter().filter(|&&c| c == 11).count(), 4);
    }
}
