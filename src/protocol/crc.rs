//! CRC-16/Modbus (reflected polynomial 0xA001, initial value 0xFFFF).

/// Compute the CRC over `data`.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Check that the trailing two bytes (little-endian) match the CRC of the
/// rest of `frame`.
pub fn check(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    crc16_modbus(body) == u16::from_le_bytes([tail[0], tail[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_read_frame() {
        // 01 03 0000 0001 -> CRC 0x0A84, sent as 84 0A.
        assert_eq!(crc16_modbus(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
    }

    #[test]
    fn slave_0x11_read_frame() {
        assert_eq!(crc16_modbus(&[0x11, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x9A86);
    }

    #[test]
    fn check_accepts_valid_and_rejects_flipped() {
        let frame = [0x11, 0x03, 0x02, 0x09, 0x01, 0xBE, 0x17];
        assert!(check(&frame));
        let mut bad = frame;
        bad[3] ^= 0x01;
        assert!(!check(&bad));
    }

    #[test]
    fn check_rejects_short_input() {
        assert!(!check(&[0x01, 0x02]));
    }
}
