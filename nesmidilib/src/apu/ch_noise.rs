use crate::config::NoiseRemapping;
use crate::midi::PERCUSSION_CHANNEL;
use crate::SystemControl;

use super::envelope::{midi_volume, Envelope};
use super::length_counter::ENVELOPE_HALT_MASK;
use super::osc::{AmplitudeSink, MidiVoice, NesTime, Osc};
use super::pitch_table::PitchTable;

const PERIOD_LOOKUP: [NesTime; 0x10] = [
    0x004, 0x008, 0x010, 0x020, 0x040, 0x060, 0x080, 0x0A0,
    0x0CA, 0x0FE, 0x17C, 0x1FC, 0x2FA, 0x3F8, 0x7F2, 0xFE4,
];

const NOISE_INDEX: u8 = 3;
const NOISE_NOTE_A: u8 = 33;
const NOISE_CHANNEL_VOLUME: u8 = 120;

const PERIOD_MASK: u8 = 0b00001111;
const MODE_FLAG: u8 = 0b10000000;

lazy_static! {
    // low periods climb through the kick/snare/tom range, high periods fall
    // back from the cymbal/percussion end of the GM drum map
    static ref PERCUSSION_NOTES: Vec<u8> = (0..32u8).map(|period| {
        if period < 16 { 36 + period } else { 81 - (period - 16) }
    }).collect();
}

pub struct Noise {
    pub osc: Osc,
    pub envelope: Envelope,
    remappings: Vec<NoiseRemapping>,

    shift_reg: u16,
    last_midi_note_volume: u8,
}

impl SystemControl for Noise {
    fn reset(&mut self) {
        self.shift_reg = 1 << 14;
        self.envelope.reset();
        self.osc.reset();
        self.last_midi_note_volume = 0;
    }
}

impl MidiVoice for Noise {
    fn osc(&self) -> &Osc {
        &self.osc
    }

    fn osc_mut(&mut self) -> &mut Osc {
        &mut self.osc
    }

    fn midi_channel(&self) -> u8 {
        PERCUSSION_CHANNEL
    }

    fn midi_note(&self) -> u8 {
        match self.find_remapping() {
            Some(remap) => remap.dest_midi_note,
            None => self.osc.note_for_period(self.period()),
        }
    }

    fn midi_note_volume(&self) -> u8 {
        midi_volume(self.volume())
    }

    fn midi_channel_volume(&self) -> u8 {
        NOISE_CHANNEL_VOLUME
    }

    fn period(&self) -> usize {
        let reg = self.osc.regs[2];
        ((reg & PERIOD_MASK) | ((reg & MODE_FLAG) >> 3)) as usize
    }

    /// Drum hits repeat on the same note, so a louder write restarts it.
    fn note_on(&mut self, time: NesTime) {
        let voice = self.voice();

        if voice.note != self.osc.last_midi_note || voice.note_volume > self.last_midi_note_volume {
            self.osc.note_off(time);
            self.osc.write_note_on(time, &voice);
            self.osc.last_midi_channel = voice.channel;
        }

        self.osc.last_midi_note = voice.note;
        self.last_midi_note_volume = voice.note_volume;
    }

    fn set_clock_rate(&mut self, clock_rate: f64) {
        self.osc.load_pitch_table(clock_rate, PitchTable::from_notes(&PERCUSSION_NOTES));
    }
}

impl Noise {
    pub fn new() -> Self {
        Self {
            osc: Osc::new(NOISE_INDEX, NOISE_NOTE_A),
            envelope: Envelope::new(),
            remappings: Vec::new(),

            shift_reg: 1 << 14,
            last_midi_note_volume: 0,
        }
    }

    pub fn set_remappings(&mut self, remappings: Vec<NoiseRemapping>) {
        self.remappings = remappings;
    }

    pub fn find_remapping(&self) -> Option<&NoiseRemapping> {
        let period = self.period();
        self.remappings.iter().find(|remap| remap.src_period as usize == period)
    }

    pub fn volume(&self) -> u8 {
        self.envelope.volume(&self.osc)
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock(&mut self.osc);
    }

    pub fn clock_length(&mut self) {
        self.osc.clock_length(ENVELOPE_HALT_MASK);
    }

    pub fn run(&mut self, mut time: NesTime, end_time: NesTime, output: Option<&mut dyn AmplitudeSink>) {
        let period = PERIOD_LOOKUP[(self.osc.regs[2] & PERIOD_MASK) as usize];

        let Some(output) = output else {
            self.note_off(time);
            time += self.osc.delay;
            self.osc.delay = time + (end_time - time - 1) / period * period - end_time + period;
            return;
        };

        let volume = self.volume() as i32;
        let amp = if self.shift_reg & 1 != 0 { volume } else { 0 };

        let delta = self.osc.update_amp(amp);
        if delta != 0 {
            output.offset(time, delta);
        }

        if volume == 0 {
            self.note_off(time);
        } else {
            self.note_on(time);
        }

        time += self.osc.delay;
        if time < end_time {
            let mode = self.osc.regs[2] & MODE_FLAG != 0;

            if volume == 0 {
                // round up to the next period
                time += (end_time - time + period - 1) / period * period;

                // approximate the LFSR running while muted
                if !mode {
                    let noise = self.shift_reg as u32;
                    let feedback = (noise << 13) ^ (noise << 14);
                    self.shift_reg = ((feedback & 0x4000) | (noise >> 1)) as u16;
                }
            } else {
                let mut delta = amp * 2 - volume;
                let tap = if mode { 8 } else { 13 };
                let mut noise = self.shift_reg as u32;

                loop {
                    let feedback = (noise << tap) ^ (noise << 14);

                    // output bit is about to change
                    if (noise + 1) & 2 != 0 {
                        delta = -delta;
                        output.offset(time, delta);
                    }
                    time += period;

                    noise = (feedback & 0x4000) | (noise >> 1);

                    if time >= end_time {
                        break;
                    }
                }

                self.osc.last_amp = (delta + volume) >> 1;
                self.shift_reg = noise as u16;
            }
        }

        self.osc.delay = time - end_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NTSC_CLOCK_RATE;

    #[derive(Default)]
    struct Deltas(Vec<(NesTime, i32)>);

    impl AmplitudeSink for Deltas {
        fn offset(&mut self, time: NesTime, delta: i32) {
            self.0.push((time, delta));
        }
    }

    fn hit(period_reg: u8, volume: u8) -> Noise {
        let mut noise = Noise::new();
        noise.set_clock_rate(NTSC_CLOCK_RATE);
        noise.write_register(0, 0b00010000 | volume);
        noise.write_register(2, period_reg);
        noise.osc.length_counter = 10;
        noise
    }

    #[test]
    pub fn test_percussion_map() {
        let mut noise = hit(0, 4);
        assert_eq!(noise.midi_note(), 36);

        noise.write_register(2, 0x0F);
        assert_eq!(noise.midi_note(), 51);

        noise.write_register(2, MODE_FLAG);
        assert_eq!(noise.period(), 16);
        assert_eq!(noise.midi_note(), 81);

        noise.write_register(2, MODE_FLAG | 0x0F);
        assert_eq!(noise.midi_note(), 66);
        assert_eq!(noise.midi_channel(), PERCUSSION_CHANNEL);
    }

    #[test]
    pub fn test_remapping_wins() {
        let mut noise = hit(0x83, 4);
        noise.set_remappings(vec![
            NoiseRemapping { src_period: 3, dest_midi_note: 40 },
            NoiseRemapping { src_period: 19, dest_midi_note: 42 },
        ]);

        assert_eq!(noise.midi_note(), 42);

        noise.write_register(2, 0x03);
        assert_eq!(noise.midi_note(), 40);

        noise.write_register(2, 0x04);
        assert_eq!(noise.midi_note(), 40);
        assert!(noise.find_remapping().is_none());
    }

    #[test]
    pub fn test_louder_hit_retriggers() {
        let mut noise = hit(0, 4);
        noise.note_on(0);

        noise.write_register(0, 0b00010000 | 9);
        noise.note_on(100);

        let events = noise.osc.midi.events();
        let statuses: Vec<u8> = events.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![0x99, 0x89, 0x99]);
        assert_eq!(events[0].data1, 36);
        assert_eq!(events[0].data2, 32);
        assert_eq!(events[2].data1, 36);
        assert_eq!(events[2].data2, 72);
    }

    #[test]
    pub fn test_decay_does_not_retrigger() {
        let mut noise = hit(0, 9);
        noise.note_on(0);

        noise.write_register(0, 0b00010000 | 4);
        noise.note_on(100);
        noise.note_on(200);

        assert_eq!(noise.osc.midi.len(), 1);
        assert!(noise.osc.midi.events().iter().all(|e| !e.is_channel_volume() && !e.is_pitch_wheel()));
    }

    #[test]
    pub fn test_run_lfsr() {
        let mut noise = hit(0, 8);
        let mut deltas = Deltas::default();

        noise.run(0, 4000, Some(&mut deltas));

        assert!(!deltas.0.is_empty());
        assert_eq!(deltas.0.iter().map(|d| d.1).sum::<i32>(), noise.osc.last_amp);
        assert!(noise.shift_reg != 1 << 14);
        assert_eq!(noise.osc.delay, 0);
        assert!(noise.osc.midi.events()[0].is_note_on());
    }

    #[test]
    pub fn test_run_silent_releases_note() {
        let mut noise = hit(0, 8);
        let mut deltas = Deltas::default();
        noise.run(0, 400, Some(&mut deltas));

        noise.osc.length_counter = 0;
        noise.run(400, 800, Some(&mut deltas));

        assert!(noise.osc.midi.events().last().unwrap().is_note_off());
        assert_eq!(noise.osc.last_amp, 0);
    }
}
