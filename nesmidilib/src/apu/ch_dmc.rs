use crate::config::DmcRemapping;
use crate::SystemControl;

use super::osc::{AmplitudeSink, MidiVoice, NesTime, Osc};

const PERIOD_LOOKUP: [[NesTime; 0x10]; 2] = [
    [428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106,  84,  72,  54], // NTSC
    [398, 354, 316, 298, 276, 236, 210, 198, 176, 148, 132, 118,  98,  78,  66,  50], // PAL
];

pub const NO_IRQ: NesTime = NesTime::MAX / 2 + 1;

const DMC_INDEX: u8 = 4;
// 45 = MIDI A3 (110 Hz)
const DMC_NOTE_A: u8 = 33;
const DMC_VOLUME: u8 = 64;

const SAMPLE_SLOTS: usize = 6;
const FIRST_SAMPLE_CHANNEL: u8 = 10;
pub const OVERFLOW_CHANNEL: u8 = 15;

const PERIOD_MASK: u8 = 0b00001111;
const DAC_MASK: u8 = 0b01111111;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmcCtrl: u8 {
        const IRQ_ENABLED = 0b10000000;
        const LOOP        = 0b01000000;
    }
}

impl DmcCtrl {
    #[inline]
    pub fn looping(&self) -> bool {
        self.contains(DmcCtrl::LOOP)
    }

    /// Looping samples never finish, so they never raise the IRQ.
    #[inline]
    pub fn irq_enabled(&self) -> bool {
        self.contains(DmcCtrl::IRQ_ENABLED) && !self.looping()
    }
}

lazy_static! {
    // 7-bit DAC level after the nonlinear triangle/noise/DMC mixer, scaled so
    // full scale lands on 83
    static ref DAC_TABLE: Vec<u8> = {
        let tnd = |dac: f64| 159.79 / (1.0 / (dac / 22638.0) + 100.0);
        let full = tnd(127.0);
        (0..128).map(|dac| {
            if dac == 0 { 0 } else { (tnd(dac as f64) / full * 83.0) as u8 }
        }).collect()
    };
}

/// Source of sample bytes, normally the cartridge PRG space.
pub trait SampleReader {
    fn read_sample(&mut self, addr: u16) -> u8;
}

impl<F: FnMut(u16) -> u8> SampleReader for F {
    fn read_sample(&mut self, addr: u16) -> u8 {
        self(addr)
    }
}

/// Gives each distinct sample address its own MIDI channel (10-15) so samples
/// can be assigned separate instruments. Slots are never freed: the DMC plays
/// one sample at a time, and moving an address would misattribute its earlier
/// notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelAllocator {
    slots: [Option<u8>; SAMPLE_SLOTS],
    exhausted: u32,
}

impl ChannelAllocator {
    pub fn new() -> Self {
        Self {
            slots: [None; SAMPLE_SLOTS],
            exhausted: 0,
        }
    }

    pub fn lookup(&self, address: u8) -> Option<u8> {
        self.slots
            .iter()
            .position(|&slot| slot == Some(address))
            .map(|slot| FIRST_SAMPLE_CHANNEL + slot as u8)
    }

    pub fn allocate(&mut self, address: u8) -> u8 {
        if let Some(channel) = self.lookup(address) {
            return channel;
        }

        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(address);
                let channel = FIRST_SAMPLE_CHANNEL + slot as u8;
                log::info!("MIDI channel {} allocated for DMC sample ${:02X}", channel + 1, address);
                channel
            },
            None => {
                self.exhausted += 1;
                log::warn!(
                    "No free MIDI channels for DMC sample ${:02X}, using channel {}",
                    address, OVERFLOW_CHANNEL + 1
                );
                OVERFLOW_CHANNEL
            }
        }
    }

    /// Number of allocations that fell back to the overflow channel
    pub fn exhausted_count(&self) -> u32 {
        self.exhausted
    }

    /// (sample address, MIDI channel) pairs in slot order
    pub fn assignments(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, address)| address.map(|a| (a, FIRST_SAMPLE_CHANNEL + slot as u8)))
    }
}

pub struct Dmc {
    pub osc: Osc,

    /// Address of the next byte to read, relative to $8000
    pub address: u16,
    pub period: NesTime,
    buf: u8,
    bits_remain: i32,
    bits: u8,
    buf_full: bool,
    silence: bool,

    pub dac: u8,

    pub next_irq: NesTime,
    pub irq_enabled: bool,
    pub irq_flag: bool,
    pub pal_mode: bool,
    pub nonlinear: bool,
    last_time: NesTime,

    allocator: ChannelAllocator,
    remappings: Vec<DmcRemapping>,
}

impl SystemControl for Dmc {
    fn reset(&mut self) {
        self.address = 0;
        self.dac = 0;
        self.buf = 0;
        self.bits_remain = 1;
        self.bits = 0;
        self.buf_full = false;
        self.silence = true;
        self.next_irq = NO_IRQ;
        self.irq_flag = false;
        self.irq_enabled = false;
        self.last_time = 0;

        self.osc.reset();
        self.period = PERIOD_LOOKUP[0][0];
    }
}

impl MidiVoice for Dmc {
    fn osc(&self) -> &Osc {
        &self.osc
    }

    fn osc_mut(&mut self) -> &mut Osc {
        &mut self.osc
    }

    fn midi_channel(&self) -> u8 {
        match self.find_remapping() {
            Some(remap) => remap.dest_midi_chan,
            None => self.allocator.lookup(self.sample_address()).unwrap_or(OVERFLOW_CHANNEL),
        }
    }

    fn midi_note(&self) -> u8 {
        match self.find_remapping() {
            Some(remap) => remap.dest_midi_note,
            None => self.osc.note_for_period(self.period()),
        }
    }

    fn midi_note_volume(&self) -> u8 {
        DMC_VOLUME
    }

    fn midi_channel_volume(&self) -> u8 {
        DMC_VOLUME
    }

    fn period(&self) -> usize {
        self.period as usize
    }

    fn note_on(&mut self, time: NesTime) {
        if self.find_remapping().is_none() {
            self.allocator.allocate(self.sample_address());
        }

        let voice = self.voice();
        self.osc.note_on(time, &voice);
    }

    fn write_register(&mut self, reg: usize, value: u8) {
        self.osc.write_register(reg, value);

        match reg & 3 {
            0 => {
                let ctrl = DmcCtrl::from_bits_truncate(value);
                self.period = PERIOD_LOOKUP[self.pal_mode as usize][(value & PERIOD_MASK) as usize];
                self.irq_enabled = ctrl.irq_enabled();
                self.irq_flag &= self.irq_enabled;
                self.recalc_irq();
            },
            1 => {
                let old_dac = self.dac as usize;
                self.dac = value & DAC_MASK;

                // keep the pop from a direct DAC write on the nonlinear curve
                let faked_nonlinear = self.dac as i32
                    - (DAC_TABLE[self.dac as usize] as i32 - DAC_TABLE[old_dac] as i32);
                if !self.nonlinear {
                    self.osc.last_amp = faked_nonlinear;
                }
            },
            _ => {}
        }
    }

    fn end_frame(&mut self, frame_length: NesTime) {
        self.osc.end_frame(frame_length);

        self.last_time -= frame_length;
        if self.next_irq != NO_IRQ {
            self.next_irq -= frame_length;
        }
    }
}

impl Dmc {
    pub fn new() -> Self {
        Self {
            osc: Osc::new(DMC_INDEX, DMC_NOTE_A),

            address: 0,
            period: PERIOD_LOOKUP[0][0],
            buf: 0,
            bits_remain: 1,
            bits: 0,
            buf_full: false,
            silence: true,

            dac: 0,

            next_irq: NO_IRQ,
            irq_enabled: false,
            irq_flag: false,
            pal_mode: false,
            nonlinear: false,
            last_time: 0,

            allocator: ChannelAllocator::new(),
            remappings: Vec::new(),
        }
    }

    /// `$4012` value identifying the current sample
    #[inline]
    pub fn sample_address(&self) -> u8 {
        self.osc.regs[2]
    }

    pub fn set_remappings(&mut self, remappings: Vec<DmcRemapping>) {
        self.remappings = remappings;
    }

    pub fn find_remapping(&self) -> Option<&DmcRemapping> {
        let address = self.sample_address();
        let note = self.osc.note_for_period(self.period());

        self.remappings
            .iter()
            .find(|remap| remap.src_address == address && remap.src_midi_note == note)
    }

    pub fn allocator(&self) -> &ChannelAllocator {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut ChannelAllocator {
        &mut self.allocator
    }

    pub fn bytes_left(&self) -> u32 {
        self.osc.length_counter
    }

    fn ctrl(&self) -> DmcCtrl {
        DmcCtrl::from_bits_truncate(self.osc.regs[0])
    }

    pub fn reload_sample(&mut self) {
        self.address = 0x4000 + self.osc.regs[2] as u16 * 0x40;
        self.osc.length_counter = self.osc.regs[3] as u32 * 0x10 + 1;
    }

    /// Starts the sample latched in registers 2 and 3.
    pub fn start(&mut self, time: NesTime, reader: &mut dyn SampleReader) {
        self.reload_sample();
        self.note_on(time);
        self.fill_buffer(time, reader);
        self.recalc_irq();
    }

    /// `$4015` bit 4: starts an idle sample when set, stops playback when clear.
    pub fn set_enabled(&mut self, time: NesTime, enabled: bool, reader: &mut dyn SampleReader) {
        self.irq_flag = false;

        if !enabled {
            self.osc.length_counter = 0;
            self.next_irq = NO_IRQ;
            self.note_off(time);
        } else if self.osc.length_counter == 0 {
            self.start(time, reader);
        }
    }

    pub fn fill_buffer(&mut self, time: NesTime, reader: &mut dyn SampleReader) {
        if self.buf_full || self.osc.length_counter == 0 {
            return;
        }

        self.buf = reader.read_sample(0x8000 + self.address);
        self.address = (self.address + 1) & 0x7FFF;
        self.buf_full = true;

        self.osc.length_counter -= 1;
        if self.osc.length_counter == 0 {
            if self.ctrl().looping() {
                self.reload_sample();
            } else {
                self.irq_flag = self.irq_enabled;
                self.next_irq = NO_IRQ;
                self.note_off(time);
            }
        }
    }

    /// Time of the next sample fetch, or NO_IRQ when the sample is finished
    pub fn next_read_time(&self) -> NesTime {
        if self.osc.length_counter == 0 {
            return NO_IRQ;
        }

        self.last_time + self.osc.delay + (self.bits_remain - 1) * self.period
    }

    /// Sample fetches that happen before `time`, and when the last of them
    /// happens.
    pub fn count_reads(&self, time: NesTime) -> (u32, NesTime) {
        if self.osc.length_counter == 0 {
            return (0, time);
        }

        let first_read = self.next_read_time();
        let avail = time - first_read;
        if avail <= 0 {
            return (0, time);
        }

        let mut count = ((avail - 1) / (self.period * 8) + 1) as u32;
        if !self.ctrl().looping() && count > self.osc.length_counter {
            count = self.osc.length_counter;
        }

        (count, first_read + (count as NesTime - 1) * (self.period * 8) + 1)
    }

    /// Returns true when the predicted IRQ time changed.
    pub fn recalc_irq(&mut self) -> bool {
        let mut irq = NO_IRQ;
        if self.irq_enabled && self.osc.length_counter > 0 {
            let bits_left = (self.osc.length_counter as NesTime - 1) * 8 + self.bits_remain - 1;
            irq = self.last_time + self.osc.delay + bits_left * self.period + 1;
        }

        if irq != self.next_irq {
            self.next_irq = irq;
            true
        } else {
            false
        }
    }

    pub fn run(
        &mut self,
        mut time: NesTime,
        end_time: NesTime,
        mut output: Option<&mut dyn AmplitudeSink>,
        reader: &mut dyn SampleReader,
    ) {
        let delta = self.osc.update_amp(self.dac as i32);
        match output.as_mut() {
            None => self.silence = true,
            Some(out) => {
                if delta != 0 {
                    out.offset(time, delta);
                }
            }
        }

        time += self.osc.delay;
        if time < end_time {
            let mut bits_remain = self.bits_remain;

            if self.silence && !self.buf_full {
                let count = (end_time - time + self.period - 1) / self.period;
                bits_remain = (bits_remain - 1 + 8 - (count % 8)) % 8 + 1;
                time += count * self.period;
            } else {
                let mut bits = self.bits;
                let mut dac = self.dac as i32;

                loop {
                    if !self.silence {
                        let step = (bits & 1) as i32 * 4 - 2;
                        bits >>= 1;

                        if (0..=DAC_MASK as i32).contains(&(dac + step)) {
                            dac += step;
                            if let Some(out) = output.as_mut() {
                                out.offset(time, step);
                            }
                        }
                    }

                    time += self.period;

                    bits_remain -= 1;
                    if bits_remain == 0 {
                        bits_remain = 8;

                        if !self.buf_full {
                            self.silence = true;
                        } else {
                            self.silence = output.is_none();
                            bits = self.buf;
                            self.buf_full = false;
                            self.fill_buffer(time, reader);
                        }
                    }

                    if time >= end_time {
                        break;
                    }
                }

                self.dac = dac as u8;
                self.osc.last_amp = dac;
                self.bits = bits;
            }

            self.bits_remain = bits_remain;
        }

        self.osc.delay = time - end_time;
        self.last_time = end_time;
    }
}
