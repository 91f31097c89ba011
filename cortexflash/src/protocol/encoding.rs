//! Checksum and address encoding for the STM32 bootloader wire format.
//!
//! ```text
//! address frame:  [ A31..A24 | A23..A16 | A15..A8 | A7..A0 | XOR(A) ]
//! payload frame:  [ N-1 | D0 .. D(N-1) | XOR(N-1, D0 .. D(N-1)) ]
//! ```

use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};

/// XOR `data` into `seed`.
///
/// Frames that carry a length byte pass it as the seed so the length is
/// covered by the trailing checksum.
pub fn checksum(seed: u8, data: &[u8]) -> u8 {
    data.iter().fold(seed, |acc, byte| acc ^ byte)
}

/// Encode an address as 4 big-endian bytes followed by their checksum.
pub fn encode_address(address: u32) -> [u8; 5] {
    let mut frame = [0u8; 5];
    BigEndian::write_u32(&mut frame[..4], address);
    frame[4] = checksum(0, &frame[..4]);
    frame
}

/// Decode an address frame, returning `None` when the checksum does not match.
pub fn decode_address(frame: &[u8; 5]) -> Option<u32> {
    (checksum(0, &frame[..4]) == frame[4]).then(|| BigEndian::read_u32(&frame[..4]))
}

/// Sleep between protocol stages. Zero durations return immediately.
pub fn delay(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_incremental() {
        let (a, b) = (0x5Au8, 0xC3u8);
        assert_eq!(checksum(0, &[a, b]), checksum(0, &[a]) ^ b);
        assert_eq!(checksum(0, &[]), 0);
        assert_eq!(checksum(0xFF, &[0xFF]), 0);
    }

    #[test]
    fn test_checksum_seed_covers_length_byte() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let len = (data.len() - 1) as u8;
        assert_eq!(checksum(len, &data), 0x03 ^ 0x01 ^ 0x02 ^ 0x03 ^ 0x04);
    }

    #[test]
    fn test_encode_address_layout() {
        let frame = encode_address(0x0802_0000);
        assert_eq!(&frame[..4], &[0x08, 0x02, 0x00, 0x00]);
        assert_eq!(frame[4], 0x08 ^ 0x02);
    }

    #[test]
    fn test_address_round_trip() {
        for address in [0x0800_0000, 0x0806_FFF0, 0x2000_0200, u32::MAX, 0] {
            let frame = encode_address(address);
            assert_eq!(decode_address(&frame), Some(address));
            assert_eq!(frame[4], frame[0] ^ frame[1] ^ frame[2] ^ frame[3]);
        }
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut frame = encode_address(0x0800_0000);
        frame[4] ^= 0x01;
        assert_eq!(decode_address(&frame), None);
    }
}
