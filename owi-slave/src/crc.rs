#[derive(Debug, Default)]
/// Calculate the CRC-8 used to seal OWI identities and parameter blocks.
pub struct OwiCrc(u8);

impl OwiCrc {
    /// Get the current CRC value.
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    pub fn update(&mut self, byte: u8) {
        let mut crc = self.0 ^ byte;
        for _ in 0..8 {
            if crc & 0x1 == 0x1 {
                crc = (crc >> 1) ^ 0x8c; // Polynomial for CRC-8
            } else {
                crc >>= 1;
            }
        }
        self.0 = crc;
    }

    /// Compute the CRC of a sequence of bytes.
    pub fn checksum(sequence: &[u8]) -> u8 {
        let mut crc = OwiCrc(0);
        for &byte in sequence.iter() {
            crc.update(byte);
        }
        crc.0
    }

    /// Validate a sequence of bytes where the last byte is the CRC of the
    /// previous bytes.
    pub fn validate(sequence: &[u8]) -> bool {
        Self::checksum(sequence) == 0x0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_sequence_validates() {
        let mut id = [0x7d, 0x00, 0x00, 0x00, 0x42, 0x13, 0x37, 0x00];
        id[7] = OwiCrc::checksum(&id[..7]);
        assert!(OwiCrc::validate(&id));
        id[3] ^= 0x10;
        assert!(!OwiCrc::validate(&id));
    }

    #[test]
    fn incremental_matches_checksum() {
        let data = [0xf0, 0x0f, 0xaa, 0x55];
        let mut crc = OwiCrc::default();
        for &b in &data {
            crc.update(b);
        }
        assert_eq!(crc.value(), OwiCrc::checksum(&data));
    }
}
