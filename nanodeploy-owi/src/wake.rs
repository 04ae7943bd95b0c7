use core::cell::Cell;
use critical_section::Mutex;

/// Wake reason: the periodic tick fired.
///
/// Owned by the tick subsystem; the OWI core never sets or clears it.
pub const WAKE_TICK: u8 = 1 << 0;

/// Wake reason: a full command byte has been decoded.
pub const WAKE_OWI_CMD: u8 = 1 << 1;

/// Wake reason: an armed multi-byte transfer has completed.
pub const WAKE_OWI_XFER: u8 = 1 << 2;

/// Shared bitmask of wake reasons.
///
/// Interrupt glue raises bits; the foreground loop takes the bits it owns and
/// handles each reason before sleeping again. A bit is set at most once
/// before being observed under the single-core, single-priority interrupt
/// model, and [`take`](WakeFlags::take) leaves bits owned by other subsystems
/// untouched.
pub struct WakeFlags(Mutex<Cell<u8>>);

impl WakeFlags {
    /// A bitmask with no reasons pending.
    pub const fn new() -> Self {
        Self(Mutex::new(Cell::new(0)))
    }

    /// Raise `bits`, from interrupt context.
    pub fn raise(&self, bits: u8) {
        critical_section::with(|cs| {
            let flags = self.0.borrow(cs);
            flags.set(flags.get() | bits);
        });
    }

    /// Atomically fetch and clear the reasons in `bits`, leaving the rest
    /// pending.
    pub fn take(&self, bits: u8) -> u8 {
        critical_section::with(|cs| {
            let flags = self.0.borrow(cs);
            let pending = flags.get();
            flags.set(pending & !bits);
            pending & bits
        })
    }

    /// Whether any reason is pending.
    pub fn pending(&self) -> bool {
        critical_section::with(|cs| self.0.borrow(cs).get() != 0)
    }
}

impl Default for WakeFlags {
    fn default() -> Self {
        Self::new()
    }
}
