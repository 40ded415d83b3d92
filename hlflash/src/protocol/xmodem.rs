//! XModem-1K framing as spoken by the HL7800 firmware loader.
//!
//! The modem accepts 1024-byte blocks guarded by a plain 8-bit
//! checksum rather than CRC16:
//!
//! ```text
//! Block format:
//! +-----+-----+------+---------------+----------+
//! | STX | SEQ | ~SEQ |   DATA (1024) | CHECKSUM |
//! +-----+-----+------+---------------+----------+
//! | 1   | 1   | 1    |     1024      | 1        |
//! +-----+-----+------+---------------+----------+
//! ```
//!
//! `~SEQ` is `255 - SEQ`. Short blocks are padded with `SUB` (0x1A) before
//! the checksum is taken, and the checksum covers the data bytes only.

use std::io::{self, Read};

/// XModem control characters.
pub mod control {
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Padding character (Ctrl-Z).
    pub const SUB: u8 = 0x1A;
}

/// Payload size of a data block.
pub const DATA_SIZE: usize = 1024;

/// Bytes preceding the payload (type, sequence, inverse sequence).
pub const HEADER_SIZE: usize = 3;

/// Total length of an encoded data block.
pub const FRAME_SIZE: usize = HEADER_SIZE + DATA_SIZE + 1;

/// 8-bit additive checksum over `data`.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Inverse sequence byte sent after `seq`.
pub fn inverse_sequence(seq: u8) -> u8 {
    0xFF - seq
}

/// Build a data block for `seq` from up to [`DATA_SIZE`] payload bytes.
///
/// Payloads shorter than a block are padded with [`control::SUB`].
pub fn build_data_frame(seq: u8, data: &[u8]) -> Vec<u8> {
    let len = data.len().min(DATA_SIZE);

    let mut frame = Vec::with_capacity(FRAME_SIZE);
    frame.push(control::STX);
    frame.push(seq);
    frame.push(inverse_sequence(seq));
    frame.extend_from_slice(&data[..len]);
    frame.resize(HEADER_SIZE + DATA_SIZE, control::SUB);

    let sum = checksum(&frame[HEADER_SIZE..]);
    frame.push(sum);
    frame
}

/// The single-byte end-of-transmission frame.
pub fn eot_frame() -> Vec<u8> {
    vec![control::EOT]
}

/// Fill `buf` from `reader`, stopping early only at end of file.
///
/// Returns the number of bytes read; fewer than `buf.len()` means the
/// reader is exhausted.
pub fn read_block<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), 0x06);
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
    }

    #[test]
    fn test_build_data_frame_full_block() {
        let data: Vec<u8> = (0..DATA_SIZE).map(|i| (i % 251) as u8).collect();

        let frame = build_data_frame(5, &data);

        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(frame[0], control::STX);
        assert_eq!(frame[1], 5);
        assert_eq!(frame[2], 0xFA);
        assert_eq!(&frame[HEADER_SIZE..HEADER_SIZE + DATA_SIZE], data.as_slice());
        assert_eq!(frame[FRAME_SIZE - 1], checksum(&data));
    }

    #[test]
    fn test_build_data_frame_pads_with_sub() {
        let frame = build_data_frame(1, &[0x41, 0x42]);

        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(&frame[3..5], &[0x41, 0x42]);
        assert!(frame[5..HEADER_SIZE + DATA_SIZE]
            .iter()
            .all(|&b| b == control::SUB));

        // Checksum covers padding but never the header
        let expected = 0x41u32 + 0x42 + u32::from(control::SUB) * (DATA_SIZE as u32 - 2);
        assert_eq!(frame[FRAME_SIZE - 1], (expected % 256) as u8);
    }

    #[test]
    fn test_sequence_and_inverse_sum_to_ff() {
        for seq in 0..=u8::MAX {
            let frame = build_data_frame(seq, &[]);
            assert_eq!(frame[1].wrapping_add(frame[2]), 0xFF);
        }
    }

    #[test]
    fn test_eot_frame() {
        assert_eq!(eot_frame(), vec![0x04]);
    }

    /// Reader that hands out at most three bytes per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.0.len()).min(3);
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_read_block_survives_short_reads() {
        let data = [7u8; 10];
        let mut reader = Trickle(&data);
        let mut buf = [0u8; 8];

        assert_eq!(read_block(&mut reader, &mut buf).unwrap(), 8);
        assert_eq!(read_block(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_block(&mut reader, &mut buf).unwrap(), 0);
    }
}
