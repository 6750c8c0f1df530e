pub const PERIOD_COUNT: usize = 0x800;

/// Pitch wheel value meaning "in tune"
pub const CENTS_CENTER: i16 = 0x2000;

// NES A is 109.9818 Hz rather than concert 110 Hz, so notes are measured from
// half of the NES A and shifted by each channel's note_a.
const REFERENCE_FREQUENCY: f64 = 54.99090178;

/// Nearest MIDI note and biased cent deviation for every 11-bit timer period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitchTable {
    pub notes: [u8; PERIOD_COUNT],
    pub cents: [i16; PERIOD_COUNT],
}

impl Default for PitchTable {
    fn default() -> Self {
        Self {
            notes: [0; PERIOD_COUNT],
            cents: [0; PERIOD_COUNT],
        }
    }
}

impl PitchTable {
    pub fn build(clock_rate: f64, note_a: u8) -> Self {
        let mut table = Self::default();

        for p in 0..PERIOD_COUNT {
            let frequency = clock_rate / (16 * (p + 1)) as f64;
            let n = (frequency / REFERENCE_FREQUENCY).log2() * 12.0;
            let nearest = n.round();

            table.notes[p] = (nearest as i32 + note_a as i32).clamp(0, 127) as u8;
            table.cents[p] = ((n - nearest) * 0xFFF as f64) as i16 + CENTS_CENTER;
        }

        table
    }

    /// Table with fixed notes for the first periods and every deviation centered.
    pub fn from_notes(notes: &[u8]) -> Self {
        let mut table = Self {
            notes: [0; PERIOD_COUNT],
            cents: [CENTS_CENTER; PERIOD_COUNT],
        };
        table.notes[..notes.len()].copy_from_slice(notes);

        table
    }
}
