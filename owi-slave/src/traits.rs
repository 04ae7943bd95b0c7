//! Hardware traits the protocol engine is generic over.
//!
//! An implementation maps these onto one open-drain GPIO with an
//! edge-sensitive interrupt and one free-running hardware timer with two
//! independent compare channels. The simulator in `owi-sim` provides a
//! software implementation for host-side testing.

/// The shared open-drain bus line.
///
/// The line idles high through an external pull-up; either side signals by
/// pulling it low. The engine never drives the line high.
pub trait OwiLine {
    /// Pull the line low.
    fn pull_low(&mut self);

    /// Release the line to the bus pull-up.
    fn release(&mut self);

    /// Sample the current line level. `true` means high.
    fn is_high(&self) -> bool;
}

/// One hardware timer with two compare channels.
///
/// The bit channel is a one-shot used for bit sampling, transmit slots and
/// the presence pulse; the reset channel is the bus-reset watchdog. Compare
/// values are absolute counter values at the timer's native tick rate, and
/// fire when the running counter reaches them.
pub trait BitTimer {
    /// Zero the counter and leave it running.
    fn restart(&mut self);

    /// Stop the counter.
    fn stop(&mut self);

    /// Current counter value.
    fn now(&self) -> u32;

    /// Arm the bit compare channel to fire when the counter reaches `at`.
    fn arm_bit(&mut self, at: u32);

    /// Disarm the bit compare channel.
    fn disarm_bit(&mut self);

    /// Arm the reset-watchdog compare channel to fire when the counter
    /// reaches `at`.
    fn arm_reset(&mut self, at: u32);

    /// Disarm the reset-watchdog compare channel.
    fn disarm_reset(&mut self);
}
