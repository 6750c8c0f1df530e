use crate::SystemControl;

use super::envelope::{midi_volume, Envelope, ENVELOPE_NOTE_VOLUME};
use super::length_counter::ENVELOPE_HALT_MASK;
use super::osc::{AmplitudeSink, MidiVoice, NesTime, Osc};
use super::sweep::Sweep;

const PHASE_RANGE: i32 = 8;

// 45 = MIDI A3 (110 Hz)
const PULSE_NOTE_A: u8 = 33;

pub struct Pulse {
    pub osc: Osc,
    pub envelope: Envelope,
    pub sweep: Sweep,

    phase: i32,
}

impl SystemControl for Pulse {
    fn reset(&mut self) {
        self.sweep.reset();
        self.envelope.reset();
        self.osc.reset();
        self.phase = 0;
    }
}

impl MidiVoice for Pulse {
    fn osc(&self) -> &Osc {
        &self.osc
    }

    fn osc_mut(&mut self) -> &mut Osc {
        &mut self.osc
    }

    /// Each duty cycle gets its own MIDI channel so it can carry its own instrument.
    fn midi_channel(&self) -> u8 {
        self.osc.index * 4 + self.duty_select()
    }

    fn midi_note_volume(&self) -> u8 {
        ENVELOPE_NOTE_VOLUME
    }

    fn midi_channel_volume(&self) -> u8 {
        midi_volume(self.volume())
    }
}

impl Pulse {
    pub fn new(index: u8) -> Self {
        Self {
            osc: Osc::new(index, PULSE_NOTE_A),
            envelope: Envelope::new(),
            sweep: Sweep::new(),

            phase: 0,
        }
    }

    #[inline]
    pub fn duty_select(&self) -> u8 {
        self.osc.regs[0] >> 6
    }

    pub fn volume(&self) -> u8 {
        self.envelope.volume(&self.osc)
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock(&mut self.osc);
    }

    pub fn clock_sweep(&mut self, adjust: i32) {
        self.sweep.clock(&mut self.osc, adjust);
    }

    pub fn clock_length(&mut self) {
        self.osc.clock_length(ENVELOPE_HALT_MASK);
    }

    pub fn audible(&self) -> bool {
        self.volume() > 0 && self.osc.period() >= 8 && !Sweep::target_overflows(&self.osc)
    }

    fn maintain_phase(&mut self, mut time: NesTime, end_time: NesTime, timer_period: NesTime) -> NesTime {
        let remain = end_time - time;
        if remain > 0 {
            let count = (remain + timer_period - 1) / timer_period;
            self.phase = (self.phase + count) & (PHASE_RANGE - 1);
            time += count * timer_period;
        }

        time
    }

    pub fn run(&mut self, mut time: NesTime, end_time: NesTime, output: Option<&mut dyn AmplitudeSink>) {
        let timer_period = (self.osc.period() as NesTime + 1) * 2;

        let Some(output) = output else {
            self.note_off(time);
            self.osc.delay = self.maintain_phase(time + self.osc.delay, end_time, timer_period) - end_time;
            return;
        };

        if !self.audible() {
            if self.osc.last_amp != 0 {
                output.offset(time, -self.osc.last_amp);
                self.osc.last_amp = 0;
            }
            self.note_off(time);

            time += self.osc.delay;
            time = self.maintain_phase(time, end_time, timer_period);
        } else {
            let volume = self.volume() as i32;

            // duty 3 is duty 1 inverted
            let duty_select = self.duty_select();
            let mut duty = 1 << duty_select;
            let mut amp = 0;
            if duty_select == 3 {
                duty = 2;
                amp = volume;
            }
            if self.phase < duty {
                amp ^= volume;
            }

            let delta = self.osc.update_amp(amp);
            if delta != 0 {
                output.offset(time, delta);
            }
            self.note_on(time);

            time += self.osc.delay;
            if time < end_time {
                let mut delta = amp * 2 - volume;
                let mut phase = self.phase;

                loop {
                    phase = (phase + 1) & (PHASE_RANGE - 1);
                    if phase == 0 || phase == duty {
                        delta = -delta;
                        output.offset(time, delta);
                    }
                    time += timer_period;

                    if time >= end_time {
                        break;
                    }
                }

                self.osc.last_amp = (delta + volume) >> 1;
                self.phase = phase;
            }
        }

        self.osc.delay = time - end_time;
    }
}

#[cfg(test)]
impl Pulse {
    pub fn test_new(duty: u8, volume: u8, period: usize) -> Self {
        let mut pulse = Pulse::new(0);
        pulse.set_clock_rate(crate::NTSC_CLOCK_RATE);
        pulse.write_register(0, (duty << 6) | 0b00010000 | volume);
        pulse.osc.set_period(period);
        pulse.osc.length_counter = 10;
        pulse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::osc::Voice;

    #[derive(Default)]
    struct Deltas(Vec<(NesTime, i32)>);

    impl AmplitudeSink for Deltas {
        fn offset(&mut self, time: NesTime, delta: i32) {
            self.0.push((time, delta));
        }
    }

    #[test]
    pub fn test_duty_routes_channel() {
        let mut pulse = Pulse::test_new(1, 8, 507);
        assert_eq!(pulse.midi_channel(), 1);

        pulse.osc.index = 1;
        pulse.write_register(0, 0b11011000);
        assert_eq!(pulse.midi_channel(), 7);
    }

    #[test]
    pub fn test_a220_end_to_end() {
        let mut pulse = Pulse::test_new(1, 8, 507);

        let voice = pulse.voice();
        assert_eq!(
            voice,
            Voice { note: 57, channel: 1, note_volume: 112, channel_volume: 64, period: 507 }
        );
        assert!((pulse.osc.cents_for_period(507) - 0x2000).abs() < 128);

        pulse.note_on(0);
        pulse.note_on(100);

        let events = pulse.osc.midi.events();
        assert_eq!(events.iter().filter(|e| e.is_note_on()).count(), 1);
        assert_eq!(events.len(), 2);
        assert!(events[0].is_channel_volume());
        assert_eq!(events[0].channel(), 1);
        assert_eq!(events[1].data1, 57);
    }

    #[test]
    pub fn test_run_emits_square_wave() {
        let mut pulse = Pulse::test_new(2, 4, 9);
        let mut deltas = Deltas::default();

        // timer period (9 + 1) * 2 = 20 clocks per phase step
        pulse.run(0, 400, Some(&mut deltas));

        assert!(!deltas.0.is_empty());
        assert_eq!(deltas.0.iter().map(|d| d.1).sum::<i32>(), pulse.osc.last_amp);
        assert!(deltas.0.iter().all(|d| d.1.abs() <= 4));
        assert!(pulse.osc.delay >= 0 && pulse.osc.delay < 20);

        let on = pulse.osc.midi.events().iter().filter(|e| e.is_note_on()).count();
        assert_eq!(on, 1);
    }

    #[test]
    pub fn test_run_silences_channel() {
        let mut pulse = Pulse::test_new(2, 4, 300);
        let mut deltas = Deltas::default();
        pulse.run(0, 1000, Some(&mut deltas));

        pulse.osc.length_counter = 0;
        pulse.run(1000, 2000, Some(&mut deltas));

        assert_eq!(pulse.osc.last_amp, 0);
        assert_eq!(deltas.0.iter().map(|d| d.1).sum::<i32>(), 0);

        let events = pulse.osc.midi.events();
        assert!(events.last().unwrap().is_note_off());
        assert_eq!(pulse.osc.last_midi_note, 0);
    }

    #[test]
    pub fn test_low_period_is_silent() {
        let mut pulse = Pulse::test_new(2, 4, 7);
        let mut deltas = Deltas::default();

        pulse.run(0, 1000, Some(&mut deltas));

        assert!(deltas.0.is_empty());
        assert!(pulse.osc.midi.is_empty());
    }

    #[test]
    pub fn test_unrouted_run_keeps_phase() {
        let mut pulse = Pulse::test_new(2, 4, 9);

        pulse.run(0, 395, None);

        assert_eq!(pulse.osc.delay, 5);
        assert_eq!(pulse.phase, 20 & (PHASE_RANGE - 1));
        assert!(pulse.osc.midi.is_empty());
    }

    #[test]
    pub fn test_clocks() {
        let mut pulse = Pulse::test_new(2, 4, 0x100);
        pulse.write_register(1, 0b10000001);
        pulse.clock_sweep(-1);
        assert_eq!(pulse.osc.period(), 0x180);

        pulse.clock_length();
        assert_eq!(pulse.osc.length_counter, 9);

        pulse.write_register(0, 0b10000011);
        pulse.write_register(3, 0);
        pulse.clock_envelope();
        assert_eq!(pulse.volume(), 15);
    }
}
