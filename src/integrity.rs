//! Payload checksums

use serde::{Deserialize, Serialize};

/// CRC-32 over a payload's original bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(u32);

impl Checksum {
    pub fn compute(data: &[u8]) -> Self {
        Checksum(crc32fast::hash(data))
    }

    pub fn from_value(value: u32) -> Self {
        Checksum(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Check `data` against this checksum
    pub fn verify(self, data: &[u8]) -> bool {
        Self::compute(data) == self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_value() {
        // Standard CRC-32 check value
        assert_eq!(Checksum::compute(b"123456789").value(), 0xCBF4_3926);
        assert_eq!(Checksum::compute(b"").value(), 0);
    }

    #[test]
    fn test_verify_detects_change() {
        let checksum = Checksum::compute(b"hello container");
        assert!(checksum.verify(b"hello container"));
        assert!(!checksum.verify(b"hello containes"));
        assert!(Checksum::from_value(checksum.value()).verify(b"hello container"));
    }
}
