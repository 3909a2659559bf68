//! CRC and checksum primitives used across the wire formats this core speaks.
//!
//! All three are pure functions: the same input always yields the same
//! output, and the streaming CRC-32 composition matches a single-shot call
//! over the concatenated bytes.

/// MSP v1 checksum: XOR-fold over `[length, command, payload...]`.
pub fn msp_v1(length: u8, command: u8, payload: &[u8]) -> u8 {
    let mut checksum = 0u8;
    checksum ^= length;
    checksum ^= command;
    for &byte in payload {
        checksum ^= byte;
    }
    checksum
}

/// CRC-8/DVB-S2: polynomial 0xD5, init 0, no reflection, no final XOR.
///
/// Used for MSP v2 frames, over `[flag, cmd_lo, cmd_hi, len_lo, len_hi, payload...]`.
pub fn crc8_dvb_s2(bytes: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in bytes {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0xD5;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Streaming CRC-32 state for DfuSe suffix validation: reflected,
/// polynomial 0xEDB88320, init 0xFFFFFFFF, final XOR 0xFFFFFFFF.
pub fn crc32_init() -> u32 {
    0xFFFF_FFFF
}

/// Fold `bytes` into an in-progress CRC-32 state.
pub fn crc32_update(mut state: u32, bytes: &[u8]) -> u32 {
    for &byte in bytes {
        state ^= byte as u32;
        for _ in 0..8 {
            let mask = (state & 1).wrapping_neg();
            state = (state >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    state
}

/// Finalize a CRC-32 state into the output value.
pub fn crc32_finalize(state: u32) -> u32 {
    state ^ 0xFFFF_FFFF
}

/// One-shot CRC-32 over a full buffer.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32_finalize(crc32_update(crc32_init(), bytes))
}
