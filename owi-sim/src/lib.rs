//! Software simulation of the nanodeploy OWI bus.
//!
//! Reproduces the electrical environment the protocol engine runs in on the
//! flight hardware: an open-drain wire pulled by either side, a 16-bit timer
//! with two compare channels, and the edge/compare interrupt dispatch order.
//! [`Harness`] plays the bus master with microsecond-granular timing and runs
//! the foreground service loop, which makes the full command set testable on
//! a host without any hardware.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::Rc,
};

use nanodeploy_owi::{
    CommandLayer, Parameters, WAKE_OWI_CMD, WAKE_OWI_XFER, WakeFlags,
    traits::{Altimeter, Barometer, ConfigStore, DeviceIdentity, LogStore},
};
use owi_slave::{BitTimer, OwiCrc, OwiEvent, OwiLine, OwiSlave, Timings};

/// Timer counter modulus; the flight hardware timer is 16-bit.
const WRAP: u32 = 0x1_0000;

/// How long the simulated master holds the line low for a bus reset.
pub const RESET_HOLD_US: u32 = 480;

/// An edge latched by the simulated GPIO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Falling,
    Rising,
}

/// The shared open-drain wire.
///
/// Level changes latch edges into a queue, like a GPIO interrupt flag; the
/// harness dispatches them to the engine once the current "interrupt" has
/// returned.
#[derive(Default)]
struct Wire {
    master_low: Cell<bool>,
    device_low: Cell<bool>,
    edges: RefCell<VecDeque<Edge>>,
}

impl Wire {
    fn is_high(&self) -> bool {
        !self.master_low.get() && !self.device_low.get()
    }

    fn set_master(&self, low: bool) {
        let before = self.is_high();
        self.master_low.set(low);
        self.latch(before);
    }

    fn set_device(&self, low: bool) {
        let before = self.is_high();
        self.device_low.set(low);
        self.latch(before);
    }

    fn latch(&self, was_high: bool) {
        let high = self.is_high();
        if was_high && !high {
            self.edges.borrow_mut().push_back(Edge::Falling);
        } else if !was_high && high {
            self.edges.borrow_mut().push_back(Edge::Rising);
        }
    }

    fn pop_edge(&self) -> Option<Edge> {
        self.edges.borrow_mut().pop_front()
    }
}

/// Device-side handle on the wire.
#[derive(Clone)]
pub struct SimLine(Rc<Wire>);

impl OwiLine for SimLine {
    fn pull_low(&mut self) {
        self.0.set_device(true);
    }

    fn release(&mut self) {
        self.0.set_device(false);
    }

    fn is_high(&self) -> bool {
        self.0.is_high()
    }
}

#[derive(Default)]
struct TimerRegs {
    running: Cell<bool>,
    count: Cell<u32>,
    bit: Cell<Option<u32>>,
    reset: Cell<Option<u32>>,
}

/// Device-side handle on the simulated two-channel timer.
#[derive(Clone)]
pub struct SimTimer(Rc<TimerRegs>);

impl BitTimer for SimTimer {
    fn restart(&mut self) {
        self.0.count.set(0);
        self.0.running.set(true);
    }

    fn stop(&mut self) {
        self.0.running.set(false);
    }

    fn now(&self) -> u32 {
        self.0.count.get()
    }

    fn arm_bit(&mut self, at: u32) {
        self.0.bit.set(Some(at % WRAP));
    }

    fn disarm_bit(&mut self) {
        self.0.bit.set(None);
    }

    fn arm_reset(&mut self, at: u32) {
        self.0.reset.set(Some(at % WRAP));
    }

    fn disarm_reset(&mut self) {
        self.0.reset.set(None);
    }
}

/// Process-wide operating mode of the flight computer.
///
/// The OWI core only ever forces this to [`Mode::Maintenance`]; returning to
/// flight is the autonomous logic's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Autonomous flight logic owns the device.
    Flight,
    /// A host on the OWI bus owns the device.
    Maintenance,
}

/// Simulated-board failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimBoardError {
    /// A log-storage read ran past the end of the simulated EEPROM.
    LogOutOfRange,
    /// The barometer was read without a prior conversion request.
    SensorNotTriggered,
}

impl fmt::Display for SimBoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogOutOfRange => write!(f, "log read past end of EEPROM"),
            Self::SensorNotTriggered => write!(f, "sensor data fetched without a request"),
        }
    }
}

impl std::error::Error for SimBoardError {}

/// Size of the simulated log EEPROM.
const EEPROM_SIZE: usize = 32 * 1024;

/// Host-side stand-in for the flight board's collaborators.
///
/// Configuration lives in a parameter block sealed with the OWI CRC, log
/// storage in a flat EEPROM image, and the barometer reports whatever sample
/// the test programmed. Log reads are recorded so tests can assert on access
/// patterns.
pub struct SimBoard {
    params: [u8; 64],
    id: [u8; 8],
    eeprom: Vec<u8>,
    raw_pressure: u32,
    raw_temperature: u16,
    sample_requested: bool,
    log_reads: Vec<(u8, u16, usize)>,
}

/// Build a sealed default parameter block.
fn default_params() -> [u8; 64] {
    let mut raw = [0u8; 64];
    raw[0..7].copy_from_slice(&[0x7d, 0x4e, 0x44, 0x30, 0x01, 0x00, 0x00]);
    raw[7] = OwiCrc::checksum(&raw[0..7]);
    raw[8..10].copy_from_slice(&25u16.to_le_bytes()); // tick divider
    raw[40..44].copy_from_slice(&101_325u32.to_le_bytes()); // base pressure
    raw[44..46].copy_from_slice(&250u16.to_le_bytes()); // main altitude
    raw[48..58].copy_from_slice(b"nanodeploy");
    raw[63] = OwiCrc::checksum(&raw[..63]);
    raw
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBoard {
    /// A board with the default parameter block and an erased EEPROM.
    pub fn new() -> Self {
        let params = default_params();
        let mut id = [0; 8];
        id.copy_from_slice(&params[0..8]);
        Self {
            params,
            id,
            eeprom: vec![0xff; EEPROM_SIZE],
            raw_pressure: 101_325 * 16,
            raw_temperature: 0,
            sample_requested: false,
            log_reads: Vec::new(),
        }
    }

    /// Program the ambient pressure the barometer will report.
    pub fn with_pressure(mut self, pascals: u32) -> Self {
        self.raw_pressure = pascals * 16;
        self
    }

    /// Program the raw temperature reading the barometer will report.
    pub fn with_raw_temperature(mut self, raw: u16) -> Self {
        self.raw_temperature = raw;
        self
    }

    /// Preload log storage at `addr` with `data`.
    pub fn load_log(&mut self, addr: u16, data: &[u8]) {
        self.eeprom[addr as usize..addr as usize + data.len()].copy_from_slice(data);
    }

    /// Every `(device_select, addr, len)` log read performed so far.
    pub fn log_reads(&self) -> &[(u8, u16, usize)] {
        &self.log_reads
    }

    /// The current parameter block.
    pub fn params(&self) -> Parameters<'_> {
        Parameters::new(&self.params)
    }
}

impl DeviceIdentity for SimBoard {
    fn identity(&self) -> &[u8; 8] {
        &self.id
    }
}

impl ConfigStore for SimBoard {
    type Error = SimBoardError;

    fn load(&mut self, buf: &mut [u8; 64]) -> Result<(), SimBoardError> {
        *buf = self.params;
        Ok(())
    }

    fn store(&mut self, buf: &[u8; 64]) -> Result<(), SimBoardError> {
        self.params = *buf;
        Ok(())
    }
}

impl LogStore for SimBoard {
    type Error = SimBoardError;

    fn read(&mut self, device_select: u8, addr: u16, buf: &mut [u8]) -> Result<(), SimBoardError> {
        self.log_reads.push((device_select, addr, buf.len()));
        let start = addr as usize;
        let end = start + buf.len();
        if end > self.eeprom.len() {
            return Err(SimBoardError::LogOutOfRange);
        }
        buf.copy_from_slice(&self.eeprom[start..end]);
        Ok(())
    }
}

impl Barometer for SimBoard {
    type Error = SimBoardError;

    fn request_sample(&mut self) -> Result<(), SimBoardError> {
        self.sample_requested = true;
        Ok(())
    }

    fn raw_sample(&mut self) -> Result<(u32, u16), SimBoardError> {
        if !self.sample_requested {
            return Err(SimBoardError::SensorNotTriggered);
        }
        self.sample_requested = false;
        Ok((self.raw_pressure, self.raw_temperature))
    }

    fn pressure_pascals(&self, raw: u32) -> u32 {
        raw / 16
    }
}

impl Altimeter for SimBoard {
    fn altitude_m(&self, pressure_pa: u32, base_pa: u32) -> u16 {
        if pressure_pa >= base_pa {
            return 0;
        }
        let ratio = pressure_pa as f32 / base_pa as f32;
        (44_330.77 * (1.0 - ratio.powf(0.190_263))) as u16
    }
}

/// Simulated master plus the complete device under test.
///
/// Holds the engine, the command layer, the wake-flag channel and the
/// operating-mode variable; master-side methods drive the wire with the
/// same edge/compare dispatch order as the flight hardware's interrupt
/// controller. Must not be moved while a transfer is armed, as the engine
/// then holds views into the command layer's buffers.
pub struct Harness {
    wire: Rc<Wire>,
    regs: Rc<TimerRegs>,
    /// The protocol engine under test.
    pub slave: OwiSlave<SimLine, SimTimer>,
    /// The command layer under test.
    pub cmds: CommandLayer<SimBoard>,
    /// Shared wake-reason bitmask.
    pub wake: WakeFlags,
    /// Process-wide operating mode.
    pub mode: Mode,
    time: u64,
}

impl Harness {
    /// Build a harness around `board`, with the engine still off.
    pub fn new(board: SimBoard) -> Self {
        let wire = Rc::new(Wire::default());
        let regs = Rc::new(TimerRegs::default());
        let slave = OwiSlave::new(
            SimLine(wire.clone()),
            SimTimer(regs.clone()),
            Timings::default(),
        );
        Self {
            wire,
            regs,
            slave,
            cmds: CommandLayer::new(board),
            wake: WakeFlags::new(),
            mode: Mode::Flight,
            time: 0,
        }
    }

    /// Microseconds of simulated time elapsed.
    pub fn elapsed_us(&self) -> u64 {
        self.time
    }

    /// Whether the wire currently reads high.
    pub fn line_high(&self) -> bool {
        self.wire.is_high()
    }

    fn handle_event(&mut self, event: OwiEvent) {
        log::debug!("t={}us event {:?}", self.time, event);
        match event {
            OwiEvent::Activated => self.mode = Mode::Maintenance,
            OwiEvent::CommandReady => self.wake.raise(WAKE_OWI_CMD),
            OwiEvent::TransferDone => self.wake.raise(WAKE_OWI_XFER),
        }
    }

    /// Dispatch latched edges to the engine, like the GPIO interrupt would.
    fn drain_edges(&mut self) {
        while let Some(edge) = self.wire.pop_edge() {
            let event = match edge {
                Edge::Falling => self.slave.on_falling_edge(),
                Edge::Rising => {
                    self.slave.on_rising_edge();
                    None
                }
            };
            if let Some(event) = event {
                self.handle_event(event);
            }
        }
    }

    /// Ticks until the running counter at `count` reaches `target`.
    fn ticks_until(count: u32, target: u32) -> u32 {
        (target + WRAP - count - 1) % WRAP + 1
    }

    /// Let `us` microseconds of bus time pass, firing compare channels,
    /// counter overflow and latched edges in hardware order.
    pub fn advance(&mut self, us: u32) {
        self.drain_edges();
        let mut left = us;
        while left > 0 {
            if !self.regs.running.get() {
                self.time += u64::from(left);
                return;
            }
            let count = self.regs.count.get();
            let d_bit = self.regs.bit.get().map(|at| Self::ticks_until(count, at));
            let d_reset = self.regs.reset.get().map(|at| Self::ticks_until(count, at));
            let d_wrap = WRAP - count;
            let d_next = d_bit.unwrap_or(u32::MAX).min(d_reset.unwrap_or(u32::MAX)).min(d_wrap);
            if d_next > left {
                self.regs.count.set(count + left);
                self.time += u64::from(left);
                return;
            }
            self.regs.count.set((count + d_next) % WRAP);
            self.time += u64::from(d_next);
            left -= d_next;
            if d_bit == Some(d_next) {
                let event = self.slave.on_bit_timer();
                if let Some(event) = event {
                    self.handle_event(event);
                }
            } else if d_reset == Some(d_next) {
                self.slave.on_reset_timeout();
            } else {
                self.slave.on_timer_overflow();
            }
            self.drain_edges();
        }
    }

    /// One pass of the foreground loop: take the OWI wake reasons and run
    /// the corresponding handlers.
    pub fn service(&mut self) -> Result<(), SimBoardError> {
        let flags = self.wake.take(WAKE_OWI_CMD | WAKE_OWI_XFER);
        if flags & WAKE_OWI_CMD != 0 {
            self.cmds.on_command(&mut self.slave)?;
        }
        if flags & WAKE_OWI_XFER != 0 {
            self.cmds.on_transfer_done(&mut self.slave)?;
        }
        Ok(())
    }

    /// Master: pull the wire low.
    pub fn master_pull(&mut self) {
        self.wire.set_master(true);
        self.drain_edges();
    }

    /// Master: release the wire.
    pub fn master_release(&mut self) {
        self.wire.set_master(false);
        self.drain_edges();
    }

    /// Master: issue a bus reset and report whether a presence pulse was
    /// observed.
    pub fn reset(&mut self) -> bool {
        self.master_pull();
        self.advance(RESET_HOLD_US);
        self.master_release();
        // The presence pulse runs 15us after release for 120us.
        self.advance(40);
        let presence = !self.wire.is_high();
        self.advance(200);
        presence
    }

    /// Master: write one bit slot.
    pub fn write_bit(&mut self, bit: bool) {
        self.master_pull();
        if bit {
            self.advance(2);
            self.master_release();
            self.advance(68);
        } else {
            self.advance(30);
            self.master_release();
            self.advance(40);
        }
    }

    /// Master: read one bit slot.
    pub fn read_bit(&mut self) -> bool {
        self.master_pull();
        self.advance(2);
        self.master_release();
        self.advance(8);
        let bit = self.wire.is_high();
        self.advance(60);
        bit
    }

    /// Master: write one byte, least significant bit first.
    pub fn write_byte(&mut self, byte: u8) {
        for i in 0..8 {
            self.write_bit(byte & (1 << i) != 0);
        }
    }

    /// Master: read one byte, least significant bit first.
    pub fn read_byte(&mut self) -> u8 {
        let mut byte = 0;
        for i in 0..8 {
            if self.read_bit() {
                byte |= 1 << i;
            }
        }
        byte
    }

    /// Master: send a command byte and run the foreground loop once.
    pub fn command(&mut self, code: u8) -> Result<(), SimBoardError> {
        log::debug!("t={}us command {code:#04x}", self.time);
        self.write_byte(code);
        self.service()
    }

    /// Master: read `buf.len()` bytes of an armed device send, then run the
    /// foreground loop to resolve the continuation.
    pub fn read_block(&mut self, buf: &mut [u8]) -> Result<(), SimBoardError> {
        for b in buf.iter_mut() {
            *b = self.read_byte();
        }
        self.service()
    }

    /// Master: write `buf` into an armed device receive, then run the
    /// foreground loop to resolve the continuation.
    pub fn write_block(&mut self, buf: &[u8]) -> Result<(), SimBoardError> {
        for &b in buf {
            self.write_byte(b);
        }
        self.service()
    }

    /// Master: run one echo search round, writing back every identity bit
    /// the device reveals.
    ///
    /// Returns the discovered identity, or `None` if the device dropped out
    /// of the round (both the bit and its complement read high).
    pub fn search_round(&mut self) -> Option<[u8; 8]> {
        let mut rom = [0u8; 8];
        for i in 0..64 {
            let id_bit = self.read_bit();
            let complement = self.read_bit();
            if id_bit == complement {
                return None;
            }
            if id_bit {
                rom[i / 8] |= 1 << (i % 8);
            }
            self.write_bit(id_bit);
        }
        Some(rom)
    }
}
