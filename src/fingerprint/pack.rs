//! Byte packing for fingerprints stored in the durable tier

use super::{Fingerprint, SequenceFingerprint, FINGERPRINT_BITS};
use crate::error::{Error, Result};

/// Bytes per packed fingerprint
pub const PACKED_FINGERPRINT_LEN: usize = (FINGERPRINT_BITS / 8) as usize;

/// A packed sequence plus the shape needed to unpack it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedSequence {
    pub bytes: Vec<u8>,
    pub rows: u32,
    pub cols: u32,
}

pub fn pack_fingerprint(fp: &Fingerprint) -> Vec<u8> {
    fp.raw().to_be_bytes().to_vec()
}

pub fn unpack_fingerprint(bytes: &[u8]) -> Result<Fingerprint> {
    let arr: [u8; PACKED_FINGERPRINT_LEN] = bytes.try_into().map_err(|_| {
        Error::Packing(format!(
            "fingerprint must be {} bytes, got {}",
            PACKED_FINGERPRINT_LEN,
            bytes.len()
        ))
    })?;
    Ok(Fingerprint::from_raw(u64::from_be_bytes(arr)))
}

pub fn pack_sequence(seq: &SequenceFingerprint) -> PackedSequence {
    let mut bytes = Vec::with_capacity(seq.len() * PACKED_FINGERPRINT_LEN);
    for fp in seq.frames() {
        bytes.extend_from_slice(&fp.raw().to_be_bytes());
    }
    PackedSequence {
        bytes,
        rows: seq.len() as u32,
        cols: FINGERPRINT_BITS,
    }
}

pub fn unpack_sequence(bytes: &[u8], rows: u32, cols: u32) -> Result<SequenceFingerprint> {
    if rows == 0 {
        return Ok(SequenceFingerprint::default());
    }
    if cols != FINGERPRINT_BITS {
        return Err(Error::Packing(format!(
            "sequence rows must be {} bits wide, got {}",
            FINGERPRINT_BITS, cols
        )));
    }

    let expected = rows as usize * PACKED_FINGERPRINT_LEN;
    if bytes.len() != expected {
        return Err(Error::Packing(format!(
            "sequence of {} rows needs {} bytes, got {}",
            rows,
            expected,
            bytes.len()
        )));
    }

    let frames = bytes
        .chunks_exact(PACKED_FINGERPRINT_LEN)
        .map(unpack_fingerprint)
        .collect::<Result<Vec<_>>>()?;
    Ok(SequenceFingerprint::new(frames))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_bit_is_msb_of_first_byte() {
        let mut bits = [false; 64];
        bits[0] = true;
        bits[9] = true;
        let packed = pack_fingerprint(&Fingerprint::from_bits(&bits));
        assert_eq!(packed.len(), 8);
        assert_eq!(packed[0], 0b1000_0000);
        assert_eq!(packed[1], 0b0100_0000);
        assert!(packed[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_unpack_rejects_wrong_length() {
        assert!(matches!(unpack_fingerprint(&[0u8; 7]), Err(Error::Packing(_))));
        assert!(matches!(unpack_sequence(&[0u8; 12], 2, 64), Err(Error::Packing(_))));
        assert!(matches!(unpack_sequence(&[0u8; 8], 1, 32), Err(Error::Packing(_))));
    }

    #[test]
    fn test_empty_sequence() {
        let packed = pack_sequence(&SequenceFingerprint::default());
        assert!(packed.bytes.is_empty());
        assert_eq!(packed.rows, 0);
        assert!(unpack_sequence(&packed.bytes, packed.rows, packed.cols)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_sequence_layout() {
        let seq = SequenceFingerprint::new(vec![
            Fingerprint::from_raw(0x0102_0304_0506_0708),
            Fingerprint::from_raw(u64::MAX),
        ]);
        let packed = pack_sequence(&seq);
        assert_eq!(packed.rows, 2);
        assert_eq!(packed.cols, 64);
        assert_eq!(&packed.bytes[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(unpack_sequence(&packed.bytes, 2, 64).unwrap(), seq);
    }
}
