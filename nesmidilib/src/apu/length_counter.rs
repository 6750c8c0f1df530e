use super::osc::Osc;

const LENGTH_LOOKUP: [u8; 0x20] = [
    10,254, 20,  2, 40,  4, 80,  6, 160,  8, 60, 10, 14, 12, 26, 14,
    12, 16, 24, 18, 48, 20, 96, 22, 192, 24, 72, 26, 16, 28, 32, 30
];

/// Halt bit for pulse and noise (shared with the envelope loop flag)
pub const ENVELOPE_HALT_MASK: u8 = 0b00100000;
/// Halt bit for the triangle (shared with the linear counter control flag)
pub const TRIANGLE_HALT_MASK: u8 = 0b10000000;

impl Osc {
    pub fn clock_length(&mut self, halt_mask: u8) {
        if self.length_counter > 0 && (self.regs[0] & halt_mask) == 0 {
            self.length_counter -= 1;
        }
    }

    /// Loads the length counter from the upper five bits of a length register write.
    pub fn reload_length(&mut self, byte: u8) {
        self.length_counter = LENGTH_LOOKUP[(byte >> 3) as usize] as u32;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.length_counter = 0;
        }
    }

    pub fn silenced(&self) -> bool {
        self.length_counter == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_reload_from_table() {
        let mut osc = Osc::new(0, 33);

        osc.reload_length(0b00001000);
        assert_eq!(osc.length_counter, 254);

        osc.reload_length(0b11111111);
        assert_eq!(osc.length_counter, 30);
    }

    #[test]
    pub fn test_clock_and_halt() {
        let mut osc = Osc::new(0, 33);
        osc.reload_length(0b00011000);
        assert_eq!(osc.length_counter, 2);

        osc.write_register(0, ENVELOPE_HALT_MASK);
        osc.clock_length(ENVELOPE_HALT_MASK);
        assert_eq!(osc.length_counter, 2);

        osc.write_register(0, 0);
        osc.clock_length(ENVELOPE_HALT_MASK);
        osc.clock_length(ENVELOPE_HALT_MASK);
        osc.clock_length(ENVELOPE_HALT_MASK);
        assert_eq!(osc.length_counter, 0);
        assert!(osc.silenced());
    }

    #[test]
    pub fn test_disable_clears_counter() {
        let mut osc = Osc::new(0, 33);
        osc.reload_length(0);
        assert!(!osc.silenced());

        osc.set_enabled(true);
        assert_eq!(osc.length_counter, 10);

        osc.set_enabled(false);
        assert!(osc.silenced());
    }
}
