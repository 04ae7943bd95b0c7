use owi_slave::{
    BitTimer, OWI_MATCH_ID_CMD, OWI_READ_ID_CMD, OWI_SEARCH_CMD, OWI_SKIP_CMD, OwiLine, OwiSlave,
    XferBuf,
};

use crate::{
    DEV_LOAD_CFG_CMD, DEV_LOAD_DATA_CMD, DEV_MEASURE_CMD, DEV_READ_DATA_CMD, DEV_SAVE_CFG_CMD,
    DEV_WRITE_DATA_CMD,
    traits::{Altimeter, Barometer, ConfigStore, DeviceIdentity, LogStore},
};

/// Sea-level standard pressure, the altitude reference for measurements.
pub const STANDARD_PRESSURE_PA: u32 = 101_325;

/// Scratch offset of the measured pressure (u32, pascals).
pub const MEAS_PRESSURE_OFFSET: usize = 0;

/// Scratch offset of the computed altitude (u16, meters).
pub const MEAS_ALTITUDE_OFFSET: usize = 4;

/// Scratch offset of the raw temperature reading (u16).
pub const MEAS_TEMPERATURE_OFFSET: usize = 6;

/// Recorded intent for what to do once an in-flight transfer completes.
///
/// Set by the dispatcher before arming a transfer, consumed exactly once by
/// [`CommandLayer::on_transfer_done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Re-arm for the next command byte.
    Reselect,
    /// Compare the received 8 bytes against the device identity; reselect
    /// only on an exact match.
    VerifyIdentity,
    /// Interpret the received 2 bytes as a storage address and stream 64
    /// bytes from log storage into the scratch buffer.
    StreamStoredData,
}

/// Foreground command dispatcher and transfer-completion handler.
///
/// Owns the 64-byte scratch buffer all bulk commands operate on, the address
/// staging buffer, and a copy of the device identity. Invoked by the
/// foreground loop when the command-ready or transfer-complete wake reasons
/// are observed; never called from interrupt context.
///
/// While a transfer is in flight the engine holds raw views into this
/// struct's buffers, so it must not be moved between arming a transfer and
/// observing its completion. Embedded applications keep it in a `static`;
/// the simulator keeps it pinned inside its harness.
pub struct CommandLayer<B> {
    board: B,
    id: [u8; 8],
    addr_buf: [u8; 8],
    scratch: [u8; 64],
    pending: Option<Continuation>,
}

impl<B: DeviceIdentity> CommandLayer<B> {
    /// Create a command layer around the board collaborators.
    ///
    /// The identity is copied out of the board here; its provider guarantees
    /// it stable for the process lifetime.
    pub fn new(board: B) -> Self {
        let id = *board.identity();
        Self {
            board,
            id,
            addr_buf: [0; 8],
            scratch: [0; 64],
            pending: None,
        }
    }
}

impl<B> CommandLayer<B> {
    /// The board collaborators.
    pub fn board(&self) -> &B {
        &self.board
    }

    /// Mutable access to the board collaborators.
    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    /// The scratch buffer.
    ///
    /// Only meaningful between transfers; while a transfer is armed the
    /// engine owns the bytes.
    pub fn scratch(&self) -> &[u8; 64] {
        &self.scratch
    }

    /// Mutable access to the scratch buffer, for device-side preparation of
    /// bulk reads. Only valid between transfers.
    pub fn scratch_mut(&mut self) -> &mut [u8; 64] {
        &mut self.scratch
    }

    /// The continuation recorded for the transfer currently in flight.
    pub fn pending(&self) -> Option<Continuation> {
        self.pending
    }
}

impl<B, E> CommandLayer<B>
where
    B: DeviceIdentity
        + ConfigStore<Error = E>
        + LogStore<Error = E>
        + Barometer<Error = E>
        + Altimeter,
{
    /// Handle a decoded command byte.
    ///
    /// Call when the command-ready wake reason is observed, under the
    /// critical section that excludes the engine's interrupt entry points.
    /// Unrecognized codes take no action; the engine stays wherever the last
    /// operation left it until the master issues a fresh reset.
    pub fn on_command<L: OwiLine, T: BitTimer>(
        &mut self,
        owi: &mut OwiSlave<L, T>,
    ) -> Result<(), E> {
        match owi.command() {
            // Bus-housekeeping commands
            OWI_SEARCH_CMD => {
                // SAFETY: `id` is never written and outlives the search; the
                // layer is not moved while a transfer is in flight.
                owi.search(unsafe { XferBuf::shared(&self.id) });
            }
            OWI_SKIP_CMD => owi.select(),
            OWI_READ_ID_CMD => {
                // SAFETY: as above.
                owi.send(unsafe { XferBuf::shared(&self.id) });
                self.pending = Some(Continuation::Reselect);
            }
            OWI_MATCH_ID_CMD => {
                // SAFETY: `addr_buf` is untouched until the completion event.
                owi.receive(unsafe { XferBuf::exclusive(&mut self.addr_buf) });
                self.pending = Some(Continuation::VerifyIdentity);
            }
            // Device-specific commands
            DEV_READ_DATA_CMD => {
                // SAFETY: scratch is untouched until the completion event.
                owi.send(unsafe { XferBuf::shared(&self.scratch) });
                self.pending = Some(Continuation::Reselect);
            }
            DEV_WRITE_DATA_CMD => {
                // SAFETY: as above.
                owi.receive(unsafe { XferBuf::exclusive(&mut self.scratch) });
                self.pending = Some(Continuation::Reselect);
            }
            DEV_LOAD_CFG_CMD => {
                self.board.load(&mut self.scratch)?;
                owi.select();
            }
            DEV_SAVE_CFG_CMD => {
                self.board.store(&self.scratch)?;
                owi.select();
            }
            DEV_MEASURE_CMD => {
                self.measure()?;
                owi.select();
            }
            DEV_LOAD_DATA_CMD => {
                // The storage read is deferred until the address arrives.
                // SAFETY: as above.
                owi.receive(unsafe { XferBuf::exclusive(&mut self.addr_buf[..2]) });
                self.pending = Some(Continuation::StreamStoredData);
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolve the continuation of a completed transfer.
    ///
    /// Call when the transfer-complete wake reason is observed, under the
    /// critical section that excludes the engine's interrupt entry points.
    pub fn on_transfer_done<L: OwiLine, T: BitTimer>(
        &mut self,
        owi: &mut OwiSlave<L, T>,
    ) -> Result<(), E> {
        let Some(cont) = self.pending.take() else {
            return Ok(());
        };
        match cont {
            Continuation::Reselect => owi.select(),
            Continuation::VerifyIdentity => {
                // A mismatch leaves the engine unselected until the next bus
                // reset.
                if self.addr_buf == self.id {
                    owi.select();
                }
            }
            Continuation::StreamStoredData => {
                let addr = u16::from_le_bytes([self.addr_buf[0], self.addr_buf[1]]);
                self.board.read(0, addr, &mut self.scratch)?;
                owi.select();
            }
        }
        Ok(())
    }

    /// Sample the barometer and write calibrated results into the scratch
    /// buffer's measurement record.
    fn measure(&mut self) -> Result<(), E> {
        self.board.request_sample()?;
        let (raw_pressure, raw_temperature) = self.board.raw_sample()?;
        let pressure = self.board.pressure_pascals(raw_pressure);
        let altitude = self.board.altitude_m(pressure, STANDARD_PRESSURE_PA);
        self.scratch[MEAS_PRESSURE_OFFSET..MEAS_PRESSURE_OFFSET + 4]
            .copy_from_slice(&pressure.to_le_bytes());
        self.scratch[MEAS_ALTITUDE_OFFSET..MEAS_ALTITUDE_OFFSET + 2]
            .copy_from_slice(&altitude.to_le_bytes());
        self.scratch[MEAS_TEMPERATURE_OFFSET..MEAS_TEMPERATURE_OFFSET + 2]
            .copy_from_slice(&raw_temperature.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use owi_slave::{OwiState, Timings};
    use std::{cell::Cell, rc::Rc, vec::Vec};

    #[derive(Default)]
    struct WireState {
        bus_high: Cell<bool>,
        pulling: Cell<bool>,
    }

    #[derive(Clone, Default)]
    struct MockLine(Rc<WireState>);

    impl OwiLine for MockLine {
        fn pull_low(&mut self) {
            self.0.pulling.set(true);
        }

        fn release(&mut self) {
            self.0.pulling.set(false);
        }

        fn is_high(&self) -> bool {
            self.0.bus_high.get() && !self.0.pulling.get()
        }
    }

    struct NullTimer;

    impl BitTimer for NullTimer {
        fn restart(&mut self) {}
        fn stop(&mut self) {}
        fn now(&self) -> u32 {
            0
        }
        fn arm_bit(&mut self, _at: u32) {}
        fn disarm_bit(&mut self) {}
        fn arm_reset(&mut self, _at: u32) {}
        fn disarm_reset(&mut self) {}
    }

    struct MockBoard {
        id: [u8; 8],
        cfg: [u8; 64],
        stored: Option<[u8; 64]>,
        log_reads: Vec<(u8, u16, usize)>,
        raw_pressure: u32,
        raw_temperature: u16,
        sample_requested: bool,
    }

    impl MockBoard {
        fn new(id: [u8; 8]) -> Self {
            Self {
                id,
                cfg: [0xc5; 64],
                stored: None,
                log_reads: Vec::new(),
                raw_pressure: 0,
                raw_temperature: 0,
                sample_requested: false,
            }
        }
    }

    impl DeviceIdentity for MockBoard {
        fn identity(&self) -> &[u8; 8] {
            &self.id
        }
    }

    impl ConfigStore for MockBoard {
        type Error = Infallible;

        fn load(&mut self, buf: &mut [u8; 64]) -> Result<(), Infallible> {
            *buf = self.cfg;
            Ok(())
        }

        fn store(&mut self, buf: &[u8; 64]) -> Result<(), Infallible> {
            self.stored = Some(*buf);
            Ok(())
        }
    }

    impl LogStore for MockBoard {
        type Error = Infallible;

        fn read(&mut self, device_select: u8, addr: u16, buf: &mut [u8]) -> Result<(), Infallible> {
            self.log_reads.push((device_select, addr, buf.len()));
            buf.fill(0xee);
            Ok(())
        }
    }

    impl Barometer for MockBoard {
        type Error = Infallible;

        fn request_sample(&mut self) -> Result<(), Infallible> {
            self.sample_requested = true;
            Ok(())
        }

        fn raw_sample(&mut self) -> Result<(u32, u16), Infallible> {
            assert!(self.sample_requested);
            Ok((self.raw_pressure, self.raw_temperature))
        }

        fn pressure_pascals(&self, raw: u32) -> u32 {
            raw / 2
        }
    }

    impl Altimeter for MockBoard {
        fn altitude_m(&self, pressure_pa: u32, base_pa: u32) -> u16 {
            if pressure_pa >= base_pa {
                0
            } else {
                ((base_pa - pressure_pa) / 12) as u16
            }
        }
    }

    type Engine = OwiSlave<MockLine, NullTimer>;

    fn setup(id: [u8; 8]) -> (CommandLayer<MockBoard>, Engine, Rc<WireState>) {
        let line = MockLine::default();
        let wire = line.0.clone();
        wire.bus_high.set(true);
        let mut owi = OwiSlave::new(line, NullTimer, Timings::default());
        owi.activate();
        (CommandLayer::new(MockBoard::new(id)), owi, wire)
    }

    /// Clock a command byte into the engine bit-by-bit and dispatch it.
    fn dispatch(
        cmds: &mut CommandLayer<MockBoard>,
        owi: &mut Engine,
        wire: &WireState,
        cmd: u8,
    ) {
        owi.select();
        for i in 0..8 {
            wire.bus_high.set(false);
            assert!(owi.on_falling_edge().is_none());
            wire.bus_high.set(cmd & (1 << i) != 0);
            let ev = owi.on_bit_timer();
            assert_eq!(ev.is_some(), i == 7);
        }
        assert_eq!(owi.command(), cmd);
        cmds.on_command(owi).unwrap();
    }

    /// Drive an armed transfer to completion, the master writing `bytes`
    /// (receive transfers) or echoing slots (send transfers), then resolve
    /// the continuation.
    fn run_transfer(
        cmds: &mut CommandLayer<MockBoard>,
        owi: &mut Engine,
        wire: &WireState,
        bytes: &[u8],
    ) {
        let mut done = false;
        for (n, &byte) in bytes.iter().enumerate() {
            for i in 0..8 {
                wire.bus_high.set(false);
                owi.on_falling_edge();
                wire.bus_high.set(byte & (1 << i) != 0);
                if owi.on_bit_timer() == Some(owi_slave::OwiEvent::TransferDone) {
                    done = i == 7 && n == bytes.len() - 1;
                }
            }
        }
        assert!(done);
        cmds.on_transfer_done(owi).unwrap();
    }

    #[test]
    fn search_command_arms_search() {
        let (mut cmds, mut owi, wire) = setup([0x7d; 8]);
        dispatch(&mut cmds, &mut owi, &wire, OWI_SEARCH_CMD);
        assert_eq!(owi.state(), OwiState::Search);
        assert_eq!(cmds.pending(), None);
    }

    #[test]
    fn skip_selects_unconditionally() {
        let (mut cmds, mut owi, wire) = setup([0x7d; 8]);
        dispatch(&mut cmds, &mut owi, &wire, OWI_SKIP_CMD);
        assert_eq!(owi.state(), OwiState::Command);
    }

    #[test]
    fn read_id_sends_then_reselects() {
        let (mut cmds, mut owi, wire) = setup([0x7d; 8]);
        dispatch(&mut cmds, &mut owi, &wire, OWI_READ_ID_CMD);
        assert_eq!(owi.state(), OwiState::Send);
        assert_eq!(cmds.pending(), Some(Continuation::Reselect));
        run_transfer(&mut cmds, &mut owi, &wire, &[0; 8]);
        assert_eq!(owi.state(), OwiState::Command);
        assert_eq!(cmds.pending(), None);
    }

    #[test]
    fn match_with_identity_reselects() {
        let id = [0x7d, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x42];
        let (mut cmds, mut owi, wire) = setup(id);
        dispatch(&mut cmds, &mut owi, &wire, OWI_MATCH_ID_CMD);
        assert_eq!(owi.state(), OwiState::Receive);
        run_transfer(&mut cmds, &mut owi, &wire, &id);
        assert_eq!(owi.state(), OwiState::Command);
    }

    #[test]
    fn match_mismatch_leaves_unselected() {
        let id = [0x7d, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x42];
        let mut wrong = id;
        wrong[5] ^= 0x08;
        let (mut cmds, mut owi, wire) = setup(id);
        dispatch(&mut cmds, &mut owi, &wire, OWI_MATCH_ID_CMD);
        run_transfer(&mut cmds, &mut owi, &wire, &wrong);
        assert_eq!(owi.state(), OwiState::Idle);
        // Repeat attempts never spuriously reselect.
        dispatch(&mut cmds, &mut owi, &wire, OWI_MATCH_ID_CMD);
        run_transfer(&mut cmds, &mut owi, &wire, &wrong);
        assert_eq!(owi.state(), OwiState::Idle);
    }

    #[test]
    fn load_cfg_fills_scratch_synchronously() {
        let (mut cmds, mut owi, wire) = setup([0x7d; 8]);
        dispatch(&mut cmds, &mut owi, &wire, DEV_LOAD_CFG_CMD);
        assert_eq!(owi.state(), OwiState::Command);
        assert_eq!(cmds.scratch(), &[0xc5; 64]);
        assert_eq!(cmds.pending(), None);
    }

    #[test]
    fn save_cfg_persists_and_reselects() {
        let (mut cmds, mut owi, wire) = setup([0x7d; 8]);
        cmds.scratch_mut().fill(0x3a);
        dispatch(&mut cmds, &mut owi, &wire, DEV_SAVE_CFG_CMD);
        assert_eq!(cmds.board().stored, Some([0x3a; 64]));
        assert_eq!(owi.state(), OwiState::Command);
    }

    #[test]
    fn measure_writes_record_at_fixed_offsets() {
        let (mut cmds, mut owi, wire) = setup([0x7d; 8]);
        cmds.board_mut().raw_pressure = 190_650; // 95_325 Pa after conversion
        cmds.board_mut().raw_temperature = 0x0192;
        dispatch(&mut cmds, &mut owi, &wire, DEV_MEASURE_CMD);
        assert_eq!(owi.state(), OwiState::Command);
        assert!(cmds.board().sample_requested);
        let s = cmds.scratch();
        assert_eq!(u32::from_le_bytes(s[0..4].try_into().unwrap()), 95_325);
        assert_eq!(u16::from_le_bytes(s[4..6].try_into().unwrap()), 500);
        assert_eq!(u16::from_le_bytes(s[6..8].try_into().unwrap()), 0x0192);
    }

    #[test]
    fn load_data_defers_storage_read_until_address_arrives() {
        let (mut cmds, mut owi, wire) = setup([0x7d; 8]);
        dispatch(&mut cmds, &mut owi, &wire, DEV_LOAD_DATA_CMD);
        assert_eq!(owi.state(), OwiState::Receive);
        assert!(cmds.board().log_reads.is_empty());
        run_transfer(&mut cmds, &mut owi, &wire, &[0x12, 0x00]);
        assert_eq!(cmds.board().log_reads.as_slice(), &[(0, 0x0012, 64)]);
        assert_eq!(cmds.scratch(), &[0xee; 64]);
        assert_eq!(owi.state(), OwiState::Command);
    }

    #[test]
    fn write_data_receives_into_scratch() {
        let (mut cmds, mut owi, wire) = setup([0x7d; 8]);
        dispatch(&mut cmds, &mut owi, &wire, DEV_WRITE_DATA_CMD);
        assert_eq!(owi.state(), OwiState::Receive);
        let payload: Vec<u8> = (0..64).map(|i| (i as u8) ^ 0xa5).collect();
        run_transfer(&mut cmds, &mut owi, &wire, &payload);
        assert_eq!(cmds.scratch().as_slice(), payload.as_slice());
        assert_eq!(owi.state(), OwiState::Command);
    }

    #[test]
    fn unrecognized_command_takes_no_action() {
        let (mut cmds, mut owi, wire) = setup([0x7d; 8]);
        dispatch(&mut cmds, &mut owi, &wire, 0x5a);
        assert_eq!(owi.state(), OwiState::Idle);
        assert_eq!(cmds.pending(), None);
    }
}
