use crate::SystemControl;

use super::osc::Osc;

/// Note velocity for enveloped channels; loudness is carried by channel volume.
pub const ENVELOPE_NOTE_VOLUME: u8 = 112;

const VOLUME_MASK: u8 = 0b00001111;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnvelopeCtrl: u8 {
        const LOOP     = 0b00100000;
        const CONSTANT = 0b00010000;
    }
}

impl EnvelopeCtrl {
    #[inline]
    pub fn from_reg(byte: u8) -> Self {
        Self::from_bits_truncate(byte)
    }

    #[inline]
    pub fn looping(&self) -> bool {
        self.contains(EnvelopeCtrl::LOOP)
    }

    #[inline]
    pub fn constant_volume(&self) -> bool {
        self.contains(EnvelopeCtrl::CONSTANT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    level: u8,
    delay: i32,
}

impl SystemControl for Envelope {
    fn reset(&mut self) {
        self.level = 0;
        self.delay = 0;
    }
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            level: 0,
            delay: 0,
        }
    }

    /// A write to register 3 since the last clock restarts the decay at 15.
    pub fn clock(&mut self, osc: &mut Osc) {
        let period = (osc.regs[0] & VOLUME_MASK) as i32;

        if osc.reg_written[3] {
            osc.reg_written[3] = false;
            self.delay = period;
            self.level = 15;
        } else {
            self.delay -= 1;

            if self.delay < 0 {
                self.delay = period;

                if self.level > 0 {
                    self.level -= 1;
                } else if EnvelopeCtrl::from_reg(osc.regs[0]).looping() {
                    self.level = 15;
                }
            }
        }
    }

    pub fn volume(&self, osc: &Osc) -> u8 {
        if osc.length_counter == 0 {
            0
        } else if EnvelopeCtrl::from_reg(osc.regs[0]).constant_volume() {
            osc.regs[0] & VOLUME_MASK
        } else {
            self.level
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }
}

/// Scales a 0-15 hardware volume to MIDI's 0-127.
#[inline]
pub fn midi_volume(volume: u8) -> u8 {
    volume * 8
}
