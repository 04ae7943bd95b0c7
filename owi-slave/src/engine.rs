use crate::{
    XferBuf,
    traits::{BitTimer, OwiLine},
};

/// Protocol timing constants, in timer ticks.
///
/// The wire protocol is defined in microseconds; [`Timings::new`] scales the
/// constants to the tick rate of the timer backing the engine.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Continuous-low threshold past which the bus is considered reset.
    pub reset: u32,
    /// Delay from the qualifying rising edge to the start of the presence
    /// pulse.
    pub presence_delay: u32,
    /// Duration of the presence pulse.
    pub presence_pulse: u32,
    /// Delay from a falling edge to the bit sample point.
    pub sample: u32,
    /// Length of a bit transmit slot.
    pub transmit: u32,
}

impl Timings {
    /// Scale the protocol constants to a timer running at `ticks_per_us`
    /// ticks per microsecond.
    pub const fn new(ticks_per_us: u32) -> Self {
        Self {
            reset: 400 * ticks_per_us,
            presence_delay: 15 * ticks_per_us,
            presence_pulse: 120 * ticks_per_us,
            sample: 15 * ticks_per_us,
            transmit: 40 * ticks_per_us,
        }
    }
}

impl Default for Timings {
    /// One tick per microsecond, as used by the simulator.
    fn default() -> Self {
        Self::new(1)
    }
}

/// Protocol engine state.
///
/// Mutated only by the engine's interrupt entry points and the transfer
/// primitives; external code observes it through [`OwiSlave::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwiState {
    /// Engine not yet activated; the autonomous application owns the device.
    Off,
    /// Waiting for bus activity; nothing armed.
    Idle,
    /// A bus reset has been detected and is still in progress.
    Reset,
    /// Emitting the presence pulse.
    PresencePulse,
    /// Receiving a command byte.
    Command,
    /// Search: transmitting the current identity bit.
    Search,
    /// Search: transmitting the complement of the current identity bit.
    SearchComplement,
    /// Search: sampling the master's selection bit.
    SearchSelect,
    /// Transmitting an armed buffer.
    Send,
    /// Receiving into an armed buffer.
    Receive,
}

/// Wake reason produced by an interrupt entry point.
///
/// At most one event is produced per invocation. The application's interrupt
/// glue maps these onto its wake-flag bits and operating-mode variable; the
/// engine itself never touches either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwiEvent {
    /// The engine left [`OwiState::Off`]; the autonomous application logic
    /// must be suspended (operating mode forced to maintenance).
    Activated,
    /// A full command byte has been decoded and is readable through
    /// [`OwiSlave::command`].
    CommandReady,
    /// An armed multi-byte transfer has finished; the buffer view is dead.
    TransferDone,
}

/// Slave-side OWI protocol engine.
///
/// Owns the bus line and the bit timer. The interrupt entry points
/// ([`on_falling_edge`](Self::on_falling_edge),
/// [`on_rising_edge`](Self::on_rising_edge),
/// [`on_bit_timer`](Self::on_bit_timer),
/// [`on_reset_timeout`](Self::on_reset_timeout),
/// [`on_timer_overflow`](Self::on_timer_overflow)) are non-blocking and
/// bounded; all protocol timing happens there. The transfer primitives
/// ([`select`](Self::select), [`search`](Self::search),
/// [`send`](Self::send), [`receive`](Self::receive)) are foreground calls
/// and must run under the critical section that excludes the interrupt entry
/// points, as their multi-field updates are not atomic.
pub struct OwiSlave<L, T> {
    line: L,
    timer: T,
    timings: Timings,
    state: OwiState,
    buf: XferBuf,
    pos: usize,
    remaining: usize,
    bits: u8,
    acc: u8,
    cmd: u8,
}

impl<L, T> OwiSlave<L, T> {
    /// Create an engine in [`OwiState::Off`].
    pub fn new(line: L, timer: T, timings: Timings) -> Self {
        Self {
            line,
            timer,
            timings,
            state: OwiState::Off,
            buf: XferBuf::empty(),
            pos: 0,
            remaining: 0,
            bits: 0,
            acc: 0,
            cmd: 0,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> OwiState {
        self.state
    }

    /// The last fully decoded command byte.
    ///
    /// Valid between an [`OwiEvent::CommandReady`] and the next dispatch.
    pub fn command(&self) -> u8 {
        self.cmd
    }
}

impl<L: OwiLine, T: BitTimer> OwiSlave<L, T> {
    /// Force the engine into protocol mode.
    ///
    /// Happens automatically on the first falling edge while [`OwiState::Off`]
    /// (reported as [`OwiEvent::Activated`]); startup code may also call this
    /// directly when the boot-strap configuration demands it. Must run with
    /// the engine's interrupts excluded.
    pub fn activate(&mut self) {
        self.timer.stop();
        self.timer.disarm_bit();
        self.timer.disarm_reset();
        self.state = OwiState::Idle;
    }

    /// Arm the engine to decode the next command byte.
    ///
    /// The default end-of-operation action, and the response to a bus-level
    /// skip. Must run with the engine's interrupts excluded.
    pub fn select(&mut self) {
        self.timer.disarm_bit();
        self.state = OwiState::Command;
        self.bits = 8;
    }

    /// Arm a search round against the 8-byte device identity.
    ///
    /// The engine transmits each identity bit and its complement, then
    /// samples the master's selection bit; a mismatch silently drops to
    /// [`OwiState::Idle`]. The identity is only ever read. Must run with the
    /// engine's interrupts excluded.
    pub fn search(&mut self, identity: XferBuf) {
        debug_assert_eq!(identity.len(), 8);
        // Preload the first byte to keep it off the precise interrupt path.
        self.acc = identity.get(0);
        self.remaining = identity.len();
        self.buf = identity;
        self.pos = 0;
        self.bits = 8;
        self.timer.disarm_bit();
        self.state = OwiState::Search;
    }

    /// Arm transmission of the viewed bytes, least significant bit first.
    ///
    /// The view must cover at least one byte. Must run with the engine's
    /// interrupts excluded.
    pub fn send(&mut self, buf: XferBuf) {
        debug_assert!(!buf.is_empty());
        self.acc = buf.get(0);
        self.remaining = buf.len();
        self.buf = buf;
        self.pos = 0;
        self.bits = 8;
        self.timer.disarm_bit();
        self.state = OwiState::Send;
    }

    /// Arm reception into the viewed bytes.
    ///
    /// The view must cover at least one byte. Must run with the engine's
    /// interrupts excluded.
    pub fn receive(&mut self, buf: XferBuf) {
        debug_assert!(!buf.is_empty());
        self.remaining = buf.len();
        self.buf = buf;
        self.pos = 0;
        self.bits = 8;
        self.timer.disarm_bit();
        self.state = OwiState::Receive;
    }

    /// Interrupt entry point: the line was pulled low.
    ///
    /// Starts the bit slot appropriate to the current state, re-arms the
    /// reset watchdog and restarts the slot timer.
    pub fn on_falling_edge(&mut self) -> Option<OwiEvent> {
        let mut event = None;
        if self.state == OwiState::Off {
            self.activate();
            event = Some(OwiEvent::Activated);
        }
        match self.state {
            OwiState::Command | OwiState::Receive | OwiState::SearchSelect => {
                self.timer.arm_bit(self.timings.sample);
            }
            OwiState::Search | OwiState::Send => {
                // A 0 in this bit position is signalled by holding the slot low.
                if self.acc & 1 == 0 {
                    self.line.pull_low();
                }
                self.timer.arm_bit(self.timings.transmit);
            }
            OwiState::SearchComplement => {
                if self.acc & 1 != 0 {
                    self.line.pull_low();
                }
                self.timer.arm_bit(self.timings.transmit);
            }
            _ => {}
        }
        self.timer.arm_reset(self.timings.reset);
        self.timer.restart();
        event
    }

    /// Interrupt entry point: the line was released.
    ///
    /// The low phase was shorter than the reset threshold, so the watchdog is
    /// disarmed. If a reset just completed, the presence pulse is scheduled
    /// without blocking.
    pub fn on_rising_edge(&mut self) {
        if self.state == OwiState::Reset {
            // The timer keeps rolling from the falling edge, so the pulse
            // start is scheduled relative to the current count.
            let at = self.timer.now().wrapping_add(self.timings.presence_delay);
            self.timer.arm_bit(at);
        }
        self.timer.disarm_reset();
    }

    /// Interrupt entry point: the bit compare channel fired.
    ///
    /// The core bit clock; advances the state machine one bit (or one
    /// presence-pulse phase).
    pub fn on_bit_timer(&mut self) -> Option<OwiEvent> {
        self.timer.disarm_bit();
        match self.state {
            OwiState::Reset => {
                // Presence pulse start. Our own falling edge restarts the
                // timer, so the compare below measures the pulse from its
                // leading edge.
                self.line.pull_low();
                self.timer.arm_bit(self.timings.presence_pulse);
                self.state = OwiState::PresencePulse;
                None
            }
            OwiState::PresencePulse => {
                self.line.release();
                self.state = OwiState::Command;
                self.bits = 8;
                None
            }
            OwiState::Command => {
                self.sample_bit();
                if self.bits == 0 {
                    self.cmd = self.acc;
                    self.state = OwiState::Idle;
                    Some(OwiEvent::CommandReady)
                } else {
                    None
                }
            }
            OwiState::Search => {
                self.line.release();
                self.state = OwiState::SearchComplement;
                None
            }
            OwiState::SearchComplement => {
                self.line.release();
                self.state = OwiState::SearchSelect;
                None
            }
            OwiState::SearchSelect => {
                if self.line.is_high() == (self.acc & 1 != 0) {
                    // Master kept us in the round; move to the next bit.
                    self.bits -= 1;
                    if self.bits == 0 {
                        self.remaining -= 1;
                        if self.remaining == 0 {
                            // Whole identity matched; listen for the command.
                            self.state = OwiState::Command;
                        } else {
                            self.pos += 1;
                            self.acc = self.buf.get(self.pos);
                            self.state = OwiState::Search;
                        }
                        self.bits = 8;
                    } else {
                        self.acc >>= 1;
                        self.state = OwiState::Search;
                    }
                } else {
                    // Excluded from this search round.
                    self.state = OwiState::Idle;
                }
                None
            }
            OwiState::Send => {
                self.line.release();
                self.bits -= 1;
                if self.bits == 0 {
                    self.remaining -= 1;
                    if self.remaining == 0 {
                        self.buf = XferBuf::empty();
                        self.state = OwiState::Idle;
                        Some(OwiEvent::TransferDone)
                    } else {
                        self.pos += 1;
                        self.acc = self.buf.get(self.pos);
                        self.bits = 8;
                        None
                    }
                } else {
                    self.acc >>= 1;
                    None
                }
            }
            OwiState::Receive => {
                self.sample_bit();
                if self.bits == 0 {
                    self.buf.set(self.pos, self.acc);
                    self.remaining -= 1;
                    if self.remaining == 0 {
                        self.buf = XferBuf::empty();
                        self.state = OwiState::Idle;
                        Some(OwiEvent::TransferDone)
                    } else {
                        self.pos += 1;
                        self.bits = 8;
                        None
                    }
                } else {
                    None
                }
            }
            OwiState::Off | OwiState::Idle => None,
        }
    }

    /// Interrupt entry point: the reset watchdog fired.
    ///
    /// The line has been held low past the reset threshold; this overrides
    /// any in-progress operation. Resolved at the next qualifying rising
    /// edge.
    pub fn on_reset_timeout(&mut self) {
        self.timer.disarm_bit();
        self.state = OwiState::Reset;
    }

    /// Interrupt entry point: the timer counter wrapped around.
    ///
    /// Neither compare channel fired a full lap after the last edge (noise or
    /// a missed edge); stop the timer so a stale one-shot cannot fire at the
    /// wrong time.
    pub fn on_timer_overflow(&mut self) {
        self.timer.stop();
    }

    /// Shift the sampled line level into the accumulator, LSB first.
    fn sample_bit(&mut self) {
        self.acc >>= 1;
        if self.line.is_high() {
            self.acc |= 0x80;
        }
        self.bits -= 1;
    }
}
