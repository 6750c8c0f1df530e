#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate bitflags;

mod apu;
mod config;
mod error;
mod midi;

pub use apu::{
    AmplitudeSink, ApuChannels, ChannelAllocator, Dmc, MidiVoice, NesTime, Noise, Osc, Pulse,
    SampleReader, Triangle, Voice,
};
pub use config::{DmcRemapping, MidiConfig, NoiseRemapping};
pub use error::ConfigError;
pub use midi::{MidiEvent, MidiTrack, TickRate, TICK_SCALE};

pub const NTSC_CLOCK_RATE: f64 = 1789772.5;
pub const PAL_CLOCK_RATE: f64 = 1662607.125;

pub trait SystemControl {
    fn reset(&mut self);
}
