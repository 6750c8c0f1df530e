use crate::SystemControl;

use super::osc::Osc;

const SHIFT_MASK: u8 = 0b00000111;
const DIVIDER_MASK: u8 = 0b01110000;

const MAX_PERIOD: usize = 0x7FF;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SweepCtrl: u8 {
        const ENABLED = 0b10000000;
        const NEGATE  = 0b00001000;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sweep {
    delay: i32,
}

impl SystemControl for Sweep {
    fn reset(&mut self) {
        self.delay = 0;
    }
}

impl Sweep {
    pub fn new() -> Self {
        Self { delay: 0 }
    }

    /// `adjust` is -1 for pulse 1 (ones' complement negate) and 0 for pulse 2.
    pub fn clock(&mut self, osc: &mut Osc, adjust: i32) {
        let byte = osc.regs[1];
        let ctrl = SweepCtrl::from_bits_truncate(byte);

        self.delay -= 1;
        if self.delay < 0 {
            osc.reg_written[1] = true;

            let period = osc.period() as i32;
            let shift = byte & SHIFT_MASK;

            if shift > 0 && ctrl.contains(SweepCtrl::ENABLED) && period >= 8 {
                let mut offset = period >> shift;
                if ctrl.contains(SweepCtrl::NEGATE) {
                    offset = adjust - offset;
                }

                let target = period + offset;
                if target >= 0 && target as usize <= MAX_PERIOD {
                    osc.set_period(target as usize);
                }
            }
        }

        if osc.reg_written[1] {
            osc.reg_written[1] = false;
            self.delay = ((byte & DIVIDER_MASK) >> 4) as i32;
        }
    }

    /// The upward target is checked even while the sweep is disabled; one past
    /// the 11-bit range mutes the channel.
    pub fn target_overflows(osc: &Osc) -> bool {
        let byte = osc.regs[1];
        if SweepCtrl::from_bits_truncate(byte).contains(SweepCtrl::NEGATE) {
            return false;
        }

        let period = osc.period();
        period + (period >> (byte & SHIFT_MASK)) > MAX_PERIOD
    }
}
