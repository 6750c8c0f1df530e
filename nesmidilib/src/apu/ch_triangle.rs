use crate::SystemControl;

use super::length_counter::TRIANGLE_HALT_MASK;
use super::osc::{AmplitudeSink, MidiVoice, NesTime, Osc};

const PHASE_RANGE: i32 = 16;

// 33 = MIDI A2 (110 Hz)
const TRIANGLE_NOTE_A: u8 = 21;
const TRIANGLE_INDEX: u8 = 2;

pub const TRIANGLE_CHANNEL: u8 = 8;
pub const TRIANGLE_VOLUME: u8 = 120;

const RELOAD_MASK: u8 = 0b01111111;
const CONTROL_FLAG: u8 = 0b10000000;

pub struct Triangle {
    pub osc: Osc,
    pub linear_counter: LinearCounter,

    phase: i32,
}

impl SystemControl for Triangle {
    fn reset(&mut self) {
        self.linear_counter.reset();
        self.phase = 1;
        self.osc.reset();
    }
}

impl MidiVoice for Triangle {
    fn osc(&self) -> &Osc {
        &self.osc
    }

    fn osc_mut(&mut self) -> &mut Osc {
        &mut self.osc
    }

    fn midi_channel(&self) -> u8 {
        TRIANGLE_CHANNEL
    }

    fn midi_note_volume(&self) -> u8 {
        TRIANGLE_VOLUME
    }

    fn midi_channel_volume(&self) -> u8 {
        TRIANGLE_VOLUME
    }
}

impl Triangle {
    pub fn new() -> Self {
        Self {
            osc: Osc::new(TRIANGLE_INDEX, TRIANGLE_NOTE_A),
            linear_counter: LinearCounter::new(),

            phase: 1,
        }
    }

    pub fn clock_linear_counter(&mut self) {
        self.linear_counter.clock(&mut self.osc);
    }

    pub fn clock_length(&mut self) {
        self.osc.clock_length(TRIANGLE_HALT_MASK);
    }

    /// Current step of the 15..0..15 ramp
    pub fn calc_amp(&self) -> i32 {
        let amp = PHASE_RANGE - self.phase;
        if amp < 0 {
            self.phase - (PHASE_RANGE + 1)
        } else {
            amp
        }
    }

    // periods below 3 are ultrasonic and treated as silence
    fn timer_running(&self, timer_period: NesTime) -> bool {
        self.osc.length_counter > 0 && self.linear_counter.counter > 0 && timer_period >= 3
    }

    fn maintain_phase(&mut self, mut time: NesTime, end_time: NesTime, timer_period: NesTime) -> NesTime {
        let remain = end_time - time;
        if remain > 0 {
            let count = (remain + timer_period - 1) / timer_period;
            self.phase = ((self.phase - 1 - count) & (PHASE_RANGE * 2 - 1)) + 1;
            time += count * timer_period;
        }

        time
    }

    pub fn run(&mut self, mut time: NesTime, end_time: NesTime, output: Option<&mut dyn AmplitudeSink>) {
        let timer_period = self.osc.period() as NesTime + 1;

        let Some(output) = output else {
            self.note_off(time);
            time += self.osc.delay;
            self.osc.delay = 0;
            if self.timer_running(timer_period) {
                self.osc.delay = self.maintain_phase(time, end_time, timer_period) - end_time;
            }
            return;
        };

        let delta = self.osc.update_amp(self.calc_amp());
        if delta != 0 {
            output.offset(time, delta);
        }

        if !self.timer_running(timer_period) {
            self.note_off(time);
            time = end_time;
        } else {
            self.note_on(time);

            time += self.osc.delay;
            if time < end_time {
                let mut volume = 1;
                let mut phase = self.phase;
                if phase > PHASE_RANGE {
                    phase -= PHASE_RANGE;
                    volume = -volume;
                }

                loop {
                    phase -= 1;
                    if phase == 0 {
                        phase = PHASE_RANGE;
                        volume = -volume;
                    } else {
                        output.offset(time, volume);
                    }
                    time += timer_period;

                    if time >= end_time {
                        break;
                    }
                }

                if volume < 0 {
                    phase += PHASE_RANGE;
                }
                self.phase = phase;
                self.osc.last_amp = self.calc_amp();
            }
        }

        self.osc.delay = time - end_time;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinearCounter {
    pub counter: u8,
}

impl SystemControl for LinearCounter {
    fn reset(&mut self) {
        self.counter = 0;
    }
}

impl LinearCounter {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// A register 3 write reloads the counter; the reload keeps happening on
    /// every clock while the control flag is set.
    pub fn clock(&mut self, osc: &mut Osc) {
        if osc.reg_written[3] {
            self.counter = osc.regs[0] & RELOAD_MASK;
        } else if self.counter > 0 {
            self.counter -= 1;
        }

        if osc.regs[0] & CONTROL_FLAG == 0 {
            osc.reg_written[3] = false;
        }
    }
}
