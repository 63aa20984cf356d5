//! The 16-bit checksum the earbuds append to every frame they send.
//!
//! This is CRC-16/XMODEM: polynomial `0x1021`, initial value `0x0000`, no
//! reflection on input or output and no final XOR.

const POLYNOMIAL: u16 = 0x1021;

/// Computes the CRC-16/XMODEM checksum of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0x0000, |crc, &byte| {
        let mut crc = crc ^ ((byte as u16) << 8);
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
        }
        crc
    })
}
