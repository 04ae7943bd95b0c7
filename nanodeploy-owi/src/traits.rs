//! Collaborator contracts consumed by the command layer.
//!
//! The flight computer's autonomous subsystems (configuration store, log
//! storage, barometric sensor, altitude conversion) are external to the OWI
//! core; the dispatcher drives them through these traits. The synchronous
//! calls are bounded, single-shot operations by contract of the implementor;
//! the core defines no retry policy on top of them.

/// Provider of the 8-byte read-only device identity.
///
/// The value must be stable for the process lifetime; the command layer
/// copies it once at construction.
pub trait DeviceIdentity {
    /// The device identity used for search and match operations.
    fn identity(&self) -> &[u8; 8];
}

/// Non-volatile configuration store, fixed 64-byte segment.
pub trait ConfigStore {
    /// Store failure type.
    type Error;

    /// Synchronously copy the stored segment into `buf`.
    fn load(&mut self, buf: &mut [u8; 64]) -> Result<(), Self::Error>;

    /// Synchronously persist `buf` as the new segment.
    fn store(&mut self, buf: &[u8; 64]) -> Result<(), Self::Error>;
}

/// Non-volatile log storage (EEPROM-backed in the flight hardware).
pub trait LogStore {
    /// Storage failure type.
    type Error;

    /// Synchronously read `buf.len()` bytes starting at `addr` on the chip
    /// selected by `device_select`.
    fn read(&mut self, device_select: u8, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// Barometric pressure/temperature sensor transaction driver.
pub trait Barometer {
    /// Sensor failure type.
    type Error;

    /// Trigger a combined pressure/temperature conversion. Non-blocking.
    fn request_sample(&mut self) -> Result<(), Self::Error>;

    /// Fetch the raw `(pressure, temperature)` pair of the last requested
    /// conversion. Blocks until the sensor reports data ready.
    fn raw_sample(&mut self) -> Result<(u32, u16), Self::Error>;

    /// Convert a raw pressure reading to pascals.
    fn pressure_pascals(&self, raw: u32) -> u32;
}

/// Pressure-to-altitude conversion.
pub trait Altimeter {
    /// Altitude above the `base_pa` reference level, in whole meters.
    ///
    /// Returns 0 when `pressure_pa >= base_pa`; there is no negative-altitude
    /// representation.
    fn altitude_m(&self, pressure_pa: u32, base_pa: u32) -> u16;
}
