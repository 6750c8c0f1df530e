mod pitch_table;
mod osc;
mod length_counter;
mod envelope;
mod sweep;
mod ch_pulse;
mod ch_triangle;
mod ch_noise;
mod ch_dmc;

pub use self::ch_dmc::{ChannelAllocator, Dmc, SampleReader};
pub use self::ch_noise::Noise;
pub use self::ch_pulse::Pulse;
pub use self::ch_triangle::Triangle;
pub use self::osc::{AmplitudeSink, MidiVoice, NesTime, Osc, Voice};

use crate::config::MidiConfig;
use crate::midi::{merge_tracks, MidiEvent};
use crate::SystemControl;

/// The five APU oscillators, each writing its own MIDI track.
pub struct ApuChannels {
    pub pulse1: Pulse,
    pub pulse2: Pulse,
    pub triangle: Triangle,
    pub noise: Noise,
    pub dmc: Dmc,
}

impl SystemControl for ApuChannels {
    fn reset(&mut self) {
        for voice in self.voices_mut() {
            voice.reset();
        }
    }
}

impl ApuChannels {
    pub fn new(clock_rate: f64) -> Self {
        let mut channels = Self {
            pulse1: Pulse::new(0),
            pulse2: Pulse::new(1),
            triangle: Triangle::new(),
            noise: Noise::new(),
            dmc: Dmc::new(),
        };

        channels.set_clock_rate(clock_rate);
        channels
    }

    /// Channels in index order: pulse 1, pulse 2, triangle, noise, DMC.
    pub fn voices_mut(&mut self) -> [&mut dyn MidiVoice; 5] {
        [
            &mut self.pulse1,
            &mut self.pulse2,
            &mut self.triangle,
            &mut self.noise,
            &mut self.dmc,
        ]
    }

    pub fn set_clock_rate(&mut self, clock_rate: f64) {
        for voice in self.voices_mut() {
            voice.set_clock_rate(clock_rate);
        }
    }

    pub fn apply_config(&mut self, config: &MidiConfig) {
        log::debug!(
            "MIDI config: {} fps x {} ticks, {} noise remappings, {} DMC remappings",
            config.tick_rate.frames_per_second,
            config.tick_rate.ticks_per_frame,
            config.noise_remappings.len(),
            config.dmc_remappings.len(),
        );

        for voice in self.voices_mut() {
            voice.osc_mut().tick_rate = config.tick_rate;
        }

        self.noise.set_remappings(config.noise_remappings.clone());
        self.dmc.set_remappings(config.dmc_remappings.clone());
    }

    pub fn end_frame(&mut self, frame_length: NesTime) {
        for voice in self.voices_mut() {
            voice.end_frame(frame_length);
        }
    }

    /// Releases every sounding note.
    pub fn note_off_all(&mut self, time: NesTime) {
        for voice in self.voices_mut() {
            voice.note_off(time);
        }
    }

    /// Drains all five tracks into one stream ordered by tick.
    pub fn take_midi_events(&mut self) -> Vec<MidiEvent> {
        let tracks = self.voices_mut()
            .into_iter()
            .map(|voice| voice.osc_mut().midi.take())
            .collect();

        merge_tracks(tracks)
    }
}
