use crate::midi::{
    MidiTrack, TickRate, CHANNEL_VOLUME_CONTROLLER, CONTROL_CHANGE, MIDI_CHANNELS, NOTE_OFF,
    NOTE_ON, PERCUSSION_CHANNEL, PITCH_WHEEL,
};
use crate::SystemControl;

use super::pitch_table::{PitchTable, CENTS_CENTER, PERIOD_COUNT};

/// CPU clocks relative to the start of the current frame.
pub type NesTime = i32;

/// Minimum cent deviation (out of the +-0x2000 bend range) worth a pitch wheel event.
pub const WHEEL_THRESHOLD: i16 = 384;

/// Receives amplitude transitions for band-limited synthesis.
pub trait AmplitudeSink {
    fn offset(&mut self, time: NesTime, delta: i32);
}

/// Snapshot of what a channel would play right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    pub note: u8,
    pub channel: u8,
    pub note_volume: u8,
    pub channel_volume: u8,
    pub period: usize,
}

impl Voice {
    #[inline]
    pub fn pitch_wheel_enabled(&self) -> bool {
        self.channel != PERCUSSION_CHANNEL
    }
}

/// State shared by every APU channel: registers, length counter, synthesis
/// bookkeeping and the MIDI note/volume/pitch wheel state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Osc {
    pub index: u8,
    pub regs: [u8; 4],
    pub reg_written: [bool; 4],
    pub length_counter: u32,
    pub delay: NesTime,
    pub last_amp: i32,

    pub abs_time: i64,
    pub clock_rate: f64,
    pub pitch: PitchTable,
    note_a: u8,

    pub tick_rate: TickRate,
    pub midi: MidiTrack,
    pub last_midi_note: u8,
    pub last_midi_channel: u8,
    pub last_midi_channel_volume: [u8; MIDI_CHANNELS],
    pub note_on_period: usize,
    pub last_wheel_emit: [i16; MIDI_CHANNELS],
}

impl SystemControl for Osc {
    fn reset(&mut self) {
        self.delay = 0;
        self.last_amp = 0;
        self.abs_time = 0;
        self.last_midi_note = 0;
        self.last_midi_channel = 0;
        self.note_on_period = 0;
        self.last_midi_channel_volume = [0; MIDI_CHANNELS];
        self.last_wheel_emit = [CENTS_CENTER; MIDI_CHANNELS];
        self.midi.clear();
    }
}

impl Osc {
    /// `note_a` is the MIDI note the channel plays at the NES A reference period.
    pub fn new(index: u8, note_a: u8) -> Self {
        Self {
            index,
            regs: [0; 4],
            reg_written: [false; 4],
            length_counter: 0,
            delay: 0,
            last_amp: 0,

            abs_time: 0,
            clock_rate: 0.0,
            pitch: PitchTable::default(),
            note_a,

            tick_rate: TickRate::default(),
            midi: MidiTrack::new(),
            last_midi_note: 0,
            last_midi_channel: 0,
            last_midi_channel_volume: [0; MIDI_CHANNELS],
            note_on_period: 0,
            last_wheel_emit: [CENTS_CENTER; MIDI_CHANNELS],
        }
    }

    pub fn write_register(&mut self, reg: usize, value: u8) {
        self.regs[reg & 3] = value;
        self.reg_written[reg & 3] = true;
    }

    #[inline]
    pub fn period(&self) -> usize {
        ((self.regs[3] & 0x07) as usize) << 8 | self.regs[2] as usize
    }

    pub fn set_period(&mut self, period: usize) {
        self.regs[2] = (period & 0xFF) as u8;
        self.regs[3] = (self.regs[3] & !0x07) | ((period >> 8) & 0x07) as u8;
    }

    pub fn set_clock_rate(&mut self, clock_rate: f64) {
        self.load_pitch_table(clock_rate, PitchTable::build(clock_rate, self.note_a));
    }

    /// Replaces both lookup tables at once; notes and cents must never come
    /// from different clock rates.
    pub fn load_pitch_table(&mut self, clock_rate: f64, pitch: PitchTable) {
        log::debug!("channel {}: pitch table rebuilt for {} Hz", self.index, clock_rate);

        self.clock_rate = clock_rate;
        self.pitch = pitch;
    }

    #[inline]
    pub fn note_for_period(&self, period: usize) -> u8 {
        self.pitch.notes[period & (PERIOD_COUNT - 1)]
    }

    #[inline]
    pub fn cents_for_period(&self, period: usize) -> i16 {
        self.pitch.cents[period & (PERIOD_COUNT - 1)]
    }

    pub fn midi_note(&self) -> u8 {
        self.note_for_period(self.period())
    }

    pub fn update_amp(&mut self, amp: i32) -> i32 {
        let delta = amp - self.last_amp;
        self.last_amp = amp;
        delta
    }

    /// Moves the time origin forward at the end of an emulated frame.
    pub fn end_frame(&mut self, frame_length: NesTime) {
        debug_assert!(frame_length >= 0, "time went backwards");
        self.abs_time += frame_length.max(0) as i64;
    }

    pub fn abs_tick(&self, time: NesTime) -> u32 {
        self.tick_rate.tick(self.abs_time + time as i64, self.clock_rate)
    }

    pub fn note_on(&mut self, time: NesTime, voice: &Voice) {
        if voice.note != self.last_midi_note {
            self.note_off(time);

            let channel = (voice.channel & 0x0F) as usize;
            if voice.channel_volume != self.last_midi_channel_volume[channel] {
                self.write_channel_volume(time, voice.channel, voice.channel_volume);
            }

            self.note_on_period = voice.period;
            if voice.pitch_wheel_enabled()
                && (self.cents_for_period(self.note_on_period) - CENTS_CENTER).abs() < WHEEL_THRESHOLD
                && self.last_wheel_emit[channel] != CENTS_CENTER
            {
                self.write_pitch_wheel(time, voice.channel, CENTS_CENTER);
            }

            self.write_note_on(time, voice);
            self.last_midi_channel = voice.channel;
        } else {
            // Duty changes can't move a sounding note to another channel, so
            // only the volume of the channel it started on is kept up to date.
            let channel = (self.last_midi_channel & 0x0F) as usize;
            if voice.channel_volume != self.last_midi_channel_volume[channel] {
                self.write_channel_volume(time, self.last_midi_channel, voice.channel_volume);
            }
        }

        if voice.pitch_wheel_enabled() {
            let wheel = self.cents_for_period(voice.period);
            let from_center = (wheel - CENTS_CENTER).abs();
            let from_note_on = (self.cents_for_period(self.note_on_period) - wheel).abs();

            if (from_center >= WHEEL_THRESHOLD || from_note_on >= WHEEL_THRESHOLD)
                && self.last_wheel_emit[(self.last_midi_channel & 0x0F) as usize] != wheel
            {
                self.write_pitch_wheel(time, self.last_midi_channel, wheel);
            }
        }

        self.last_midi_note = voice.note;
    }

    pub fn note_off(&mut self, time: NesTime) {
        if self.last_midi_note == 0 {
            return;
        }

        let tick = self.abs_tick(time);
        self.midi.write_3(tick, NOTE_OFF | (self.last_midi_channel & 0x0F), self.last_midi_note, 0);

        self.last_midi_note = 0;
    }

    pub fn write_note_on(&mut self, time: NesTime, voice: &Voice) {
        let tick = self.abs_tick(time);
        self.midi.write_3(tick, NOTE_ON | (voice.channel & 0x0F), voice.note, voice.note_volume);
    }

    pub fn write_channel_volume(&mut self, time: NesTime, channel: u8, volume: u8) {
        let tick = self.abs_tick(time);
        self.midi.write_3(tick, CONTROL_CHANGE | (channel & 0x0F), CHANNEL_VOLUME_CONTROLLER, volume);

        self.last_midi_channel_volume[(channel & 0x0F) as usize] = volume;
    }

    pub fn write_pitch_wheel(&mut self, time: NesTime, channel: u8, wheel: i16) {
        let tick = self.abs_tick(time);
        self.midi.write_3(tick, PITCH_WHEEL | (channel & 0x0F), (wheel & 0x7F) as u8, ((wheel >> 7) & 0x7F) as u8);

        self.last_wheel_emit[(channel & 0x0F) as usize] = wheel;
    }
}

/// Per-channel MIDI mapping. Implementors supply the note, channel and volume
/// accessors; the emission state machine itself lives on [`Osc`].
pub trait MidiVoice: SystemControl {
    fn osc(&self) -> &Osc;
    fn osc_mut(&mut self) -> &mut Osc;

    fn midi_note_volume(&self) -> u8;
    fn midi_channel_volume(&self) -> u8;

    fn midi_channel(&self) -> u8 {
        self.osc().index
    }

    fn midi_note(&self) -> u8 {
        self.osc().midi_note()
    }

    fn period(&self) -> usize {
        self.osc().period()
    }

    fn voice(&self) -> Voice {
        Voice {
            note: self.midi_note(),
            channel: self.midi_channel(),
            note_volume: self.midi_note_volume(),
            channel_volume: self.midi_channel_volume(),
            period: self.period(),
        }
    }

    fn note_on(&mut self, time: NesTime) {
        let voice = self.voice();
        self.osc_mut().note_on(time, &voice);
    }

    fn note_off(&mut self, time: NesTime) {
        self.osc_mut().note_off(time);
    }

    fn write_register(&mut self, reg: usize, value: u8) {
        self.osc_mut().write_register(reg, value);
    }

    fn set_clock_rate(&mut self, clock_rate: f64) {
        self.osc_mut().set_clock_rate(clock_rate);
    }

    fn end_frame(&mut self, frame_length: NesTime) {
        self.osc_mut().end_frame(frame_length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NTSC_CLOCK_RATE;

    fn voice_for(osc: &Osc, period: usize, channel_volume: u8) -> Voice {
        Voice {
            note: osc.note_for_period(period),
            channel: 0,
            note_volume: 112,
            channel_volume,
            period,
        }
    }

    fn test_osc() -> Osc {
        let mut osc = Osc::new(0, 33);
        osc.set_clock_rate(NTSC_CLOCK_RATE);
        osc
    }

    #[test]
    pub fn test_period_registers() {
        let mut osc = Osc::new(0, 33);
        osc.write_register(2, 0xFB);
        osc.write_register(3, 0b11111001);

        assert_eq!(osc.period(), 0x1FB);
        assert!(osc.reg_written[2] && osc.reg_written[3]);

        osc.set_period(0x7AB);
        assert_eq!(osc.regs[2], 0xAB);
        assert_eq!(osc.regs[3], 0b11111111);
        assert_eq!(osc.period(), 0x7AB);
    }

    #[test]
    pub fn test_note_on_then_off() {
        let mut osc = test_osc();
        let voice = voice_for(&osc, 507, 64);

        osc.note_on(0, &voice);
        osc.note_off(100);
        osc.note_off(200);

        let events = osc.midi.events();
        assert_eq!(events.len(), 3);
        assert!(events[0].is_channel_volume());
        assert_eq!(events[0].data2, 64);
        assert!(events[1].is_note_on());
        assert_eq!(events[1].data1, 57);
        assert_eq!(events[1].data2, 112);
        assert!(events[2].is_note_off());
        assert_eq!(events[2].data1, 57);
        assert_eq!(osc.last_midi_note, 0);
    }

    #[test]
    pub fn test_unchanged_note_is_not_repeated() {
        let mut osc = test_osc();
        let voice = voice_for(&osc, 507, 64);

        for time in 0..10 {
            osc.note_on(time * 100, &voice);
        }

        assert_eq!(osc.midi.len(), 2);
        assert_eq!(osc.midi.events().iter().filter(|e| e.is_note_on()).count(), 1);
    }

    #[test]
    pub fn test_volume_change_without_restart() {
        let mut osc = test_osc();

        osc.note_on(0, &voice_for(&osc, 507, 64));
        osc.note_on(10, &voice_for(&osc, 507, 32));

        let events = osc.midi.events();
        assert_eq!(events.len(), 3);
        assert!(events[2].is_channel_volume());
        assert_eq!(events[2].data2, 32);
        assert_eq!(osc.last_midi_channel_volume[0], 32);
    }

    #[test]
    pub fn test_note_change_moves_note() {
        let mut osc = test_osc();
        let a3 = voice_for(&osc, 507, 64);
        let a4 = voice_for(&osc, 253, 64);

        osc.note_on(0, &a3);
        osc.note_on(10, &a4);

        let events = osc.midi.events();
        assert_eq!(events.len(), 4);
        assert!(events[2].is_note_off());
        assert_eq!(events[2].data1, 57);
        assert!(events[3].is_note_on());
        assert_eq!(events[3].data1, 69);
    }

    #[test]
    pub fn test_pitch_wheel_debounce() {
        let mut osc = test_osc();
        let start = 507;
        let note = osc.note_for_period(start);

        osc.note_on(0, &voice_for(&osc, start, 64));
        assert_eq!(osc.midi.events().iter().filter(|e| e.is_pitch_wheel()).count(), 0);

        // rising pitch within the same note, until it crosses the threshold
        let mut period = start;
        loop {
            period -= 1;
            assert_eq!(osc.note_for_period(period), note);

            osc.note_on(0, &voice_for(&osc, period, 64));
            if osc.cents_for_period(period) - CENTS_CENTER >= WHEEL_THRESHOLD {
                break;
            }
            assert_eq!(osc.midi.events().iter().filter(|e| e.is_pitch_wheel()).count(), 0);
        }

        let wheels: Vec<_> = osc.midi.events().iter().filter(|e| e.is_pitch_wheel()).copied().collect();
        assert_eq!(wheels.len(), 1);
        assert_eq!(wheels[0].wheel() as i16, osc.cents_for_period(period));

        for _ in 0..5 {
            osc.note_on(0, &voice_for(&osc, period, 64));
        }
        assert_eq!(osc.midi.events().iter().filter(|e| e.is_pitch_wheel()).count(), 1);
    }

    #[test]
    pub fn test_wheel_recentered_on_new_note() {
        let mut osc = test_osc();
        osc.last_wheel_emit[0] = 0x2300;

        osc.note_on(0, &voice_for(&osc, 507, 64));

        let events = osc.midi.events();
        assert!(events[1].is_pitch_wheel());
        assert_eq!(events[1].wheel(), 0x2000);
        assert!(events[2].is_note_on());
    }

    #[test]
    pub fn test_no_wheel_on_percussion_channel() {
        let mut osc = test_osc();
        let mut voice = voice_for(&osc, 507, 64);
        voice.channel = PERCUSSION_CHANNEL;
        osc.last_wheel_emit[9] = 0x2300;

        osc.note_on(0, &voice);
        voice.period = 504;
        osc.note_on(0, &voice);

        assert!(osc.midi.events().iter().all(|e| !e.is_pitch_wheel()));
    }

    #[test]
    pub fn test_ticks_include_abs_time() {
        let mut osc = test_osc();
        osc.tick_rate = TickRate { frames_per_second: 1.0, ticks_per_frame: 1.0 };
        osc.end_frame(NTSC_CLOCK_RATE as NesTime);
        osc.end_frame(NTSC_CLOCK_RATE as NesTime);

        osc.note_on(0, &voice_for(&osc, 507, 64));

        assert_eq!(osc.midi.events()[1].tick, (2.0 * crate::TICK_SCALE) as u32);
    }

    #[test]
    pub fn test_reset_twice() {
        let mut osc = test_osc();
        osc.note_on(5, &voice_for(&osc, 300, 80));
        osc.end_frame(1000);
        osc.update_amp(7);

        osc.reset();
        let once = osc.clone();
        osc.reset();

        assert_eq!(osc, once);
        assert_eq!(osc.last_midi_note, 0);
        assert_eq!(osc.abs_time, 0);
        assert!(osc.midi.is_empty());
        assert!(osc.last_wheel_emit.iter().all(|&w| w == CENTS_CENTER));
        assert!(osc.last_midi_channel_volume.iter().all(|&v| v == 0));
    }
}
