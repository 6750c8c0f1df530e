use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::midi::{TickRate, MIDI_CHANNELS};

const NOISE_PERIODS: u8 = 32;

/// Sends one noise period (mode bit folded in as bit 4) to a fixed note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseRemapping {
    pub src_period: u8,
    pub dest_midi_note: u8,
}

/// Sends a DMC sample, identified by its `$4012` address byte and the note its
/// rate would normally produce, to a fixed channel and note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmcRemapping {
    pub src_address: u8,
    pub src_midi_note: u8,
    pub dest_midi_chan: u8,
    pub dest_midi_note: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub tick_rate: TickRate,
    pub noise_remappings: Vec<NoiseRemapping>,
    pub dmc_remappings: Vec<DmcRemapping>,
}

impl MidiConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MidiConfig = serde_json::from_str(json)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;

        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let rate = &self.tick_rate;
        if !(rate.frames_per_second > 0.0 && rate.ticks_per_frame > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tick rate must be positive, got {} fps x {} ticks",
                rate.frames_per_second, rate.ticks_per_frame
            )));
        }

        for remap in &self.noise_remappings {
            if remap.src_period >= NOISE_PERIODS {
                return Err(ConfigError::Invalid(format!(
                    "noise period {} out of range (0-31)", remap.src_period
                )));
            }
            check_note(remap.dest_midi_note)?;
        }

        for remap in &self.dmc_remappings {
            if remap.dest_midi_chan as usize >= MIDI_CHANNELS {
                return Err(ConfigError::Invalid(format!(
                    "DMC sample ${:02X} mapped to channel {}", remap.src_address, remap.dest_midi_chan
                )));
            }
            check_note(remap.src_midi_note)?;
            check_note(remap.dest_midi_note)?;
        }

        Ok(())
    }
}

// note 0 marks "no note sounding" so it can't be a mapping target
fn check_note(note: u8) -> Result<()> {
    if note == 0 || note > 127 {
        return Err(ConfigError::Invalid(format!("MIDI note {} out of range (1-127)", note)));
    }

    Ok(())
}
