use serde::{Deserialize, Serialize};

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PITCH_WHEEL: u8 = 0xE0;

pub const CHANNEL_VOLUME_CONTROLLER: u8 = 0x07;

pub const MIDI_CHANNELS: usize = 16;
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Empirical multiplier applied on top of fps * ticks_per_frame when converting
/// clocks to ticks. Tuned against REAPER's reading of SMPTE-style divisions;
/// other MIDI consumers may need a different value.
pub const TICK_SCALE: f64 = 47.89463181001796;

/// Host transport timing used to turn chip clocks into MIDI ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickRate {
    pub frames_per_second: f64,
    pub ticks_per_frame: f64,
}

impl Default for TickRate {
    fn default() -> Self {
        Self {
            frames_per_second: 25.0,
            ticks_per_frame: 40.0,
        }
    }
}

impl TickRate {
    pub fn tick(&self, clocks: i64, clock_rate: f64) -> u32 {
        let seconds = clocks as f64 / clock_rate;

        (seconds * TICK_SCALE * self.frames_per_second * self.ticks_per_frame) as u32
    }
}

/// A three byte channel voice message stamped with an absolute tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub tick: u32,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiEvent {
    #[inline]
    pub fn kind(&self) -> u8 {
        self.status & 0xF0
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn is_note_on(&self) -> bool {
        self.kind() == NOTE_ON
    }

    pub fn is_note_off(&self) -> bool {
        self.kind() == NOTE_OFF
    }

    pub fn is_channel_volume(&self) -> bool {
        self.kind() == CONTROL_CHANGE && self.data1 == CHANNEL_VOLUME_CONTROLLER
    }

    pub fn is_pitch_wheel(&self) -> bool {
        self.kind() == PITCH_WHEEL
    }

    /// 14-bit pitch wheel value, only meaningful for pitch wheel events
    pub fn wheel(&self) -> u16 {
        (self.data1 as u16) | ((self.data2 as u16) << 7)
    }
}

/// Events written by a single oscillator, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MidiTrack {
    events: Vec<MidiEvent>,
}

impl MidiTrack {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn write_3(&mut self, tick: u32, status: u8, data1: u8, data2: u8) {
        self.events.push(MidiEvent {
            tick,
            status,
            data1: data1 & 0x7F,
            data2: data2 & 0x7F,
        });
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<MidiEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Merges several tracks into one stream ordered by tick. Events sharing a tick
/// keep the order of `tracks` and then their emission order.
pub fn merge_tracks(tracks: Vec<Vec<MidiEvent>>) -> Vec<MidiEvent> {
    let mut merged: Vec<MidiEvent> = tracks.into_iter().flatten().collect();
    merged.sort_by_key(|event| event.tick);
    merged
}
