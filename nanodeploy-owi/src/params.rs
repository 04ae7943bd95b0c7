use owi_slave::OwiCrc;

/// Read-only view over the 64-byte configuration segment.
///
/// The segment is laid out in 8 eight-byte lines: the OWI identity, tick
/// divider and flight-detection thresholds, phase timeouts, rate thresholds,
/// a reserved line, deployment parameters, and a 15-byte name terminated by a
/// CRC-8 sealing the whole block. All multi-byte fields are little-endian.
pub struct Parameters<'a>(&'a [u8; 64]);

impl<'a> Parameters<'a> {
    /// Wrap a raw configuration segment.
    pub fn new(raw: &'a [u8; 64]) -> Self {
        Self(raw)
    }

    /// The 8-byte OWI identity, last byte a CRC-8 of the first seven.
    pub fn identity(&self) -> [u8; 8] {
        let mut id = [0; 8];
        id.copy_from_slice(&self.0[0..8]);
        id
    }

    /// Whether the identity's trailing CRC is consistent.
    pub fn identity_valid(&self) -> bool {
        OwiCrc::validate(&self.0[0..8])
    }

    /// Divider applied to the base tick for the control loop rate.
    pub fn tick_div(&self) -> u16 {
        u16::from_le_bytes([self.0[8], self.0[9]])
    }

    /// Boost-detection acceleration threshold.
    pub fn fd_boost(&self) -> u8 {
        self.0[11]
    }

    /// Liftoff climb-rate threshold.
    pub fn rate_liftoff(&self) -> u16 {
        u16::from_le_bytes([self.0[24], self.0[25]])
    }

    /// Landing descent-rate threshold.
    pub fn rate_land(&self) -> u16 {
        u16::from_le_bytes([self.0[26], self.0[27]])
    }

    /// Reference (ground-level) pressure in pascals.
    pub fn base_pressure(&self) -> u32 {
        u32::from_le_bytes([self.0[40], self.0[41], self.0[42], self.0[43]])
    }

    /// Main-deployment altitude in meters.
    pub fn alt_main(&self) -> u16 {
        u16::from_le_bytes([self.0[44], self.0[45]])
    }

    /// Device name, NUL-padded to 15 bytes.
    pub fn name(&self) -> &str {
        let raw = &self.0[48..63];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        core::str::from_utf8(&raw[..end]).unwrap_or("")
    }

    /// Whether the block-sealing CRC is consistent.
    pub fn valid(&self) -> bool {
        OwiCrc::validate(self.0)
    }
}
