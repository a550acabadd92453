//! Bit-packed roster state encoding (UPDATE payload)
//!
//! An ordered vector of booleans (true = sitting) is encoded as the minimal
//! big-endian byte string of the integer
//!
//! ```text
//! (1 << N) | s[0] << (N-1) | s[1] << (N-2) | ... | s[N-1] << 0
//! ```
//!
//! The high `1` is a sentinel bit that self-delimits the vector length, so a
//! roster of N states always fits in `ceil((N+1)/8)` bytes and needs no
//! separate count field. Per-person identity is NOT carried here; both sides
//! re-associate states positionally against the roster order fixed at join
//! time.

use crate::error::{Error, Result};

/// Pack sitting states into the wire payload.
pub fn pack(states: &[bool]) -> Vec<u8> {
    let bits = states.len() + 1;
    let mut buf = vec![0u8; (bits + 7) / 8];

    set_bit(&mut buf, states.len());
    for (i, &sitting) in states.iter().enumerate() {
        if sitting {
            set_bit(&mut buf, states.len() - 1 - i);
        }
    }
    buf
}

/// Unpack a wire payload back into sitting states, preserving order.
///
/// Fails with a protocol violation when no sentinel bit is present
/// (all-zero or empty payload).
pub fn unpack(payload: &[u8]) -> Result<Vec<bool>> {
    let sentinel = payload
        .iter()
        .enumerate()
        .find_map(|(i, &byte)| {
            if byte == 0 {
                return None;
            }
            let high = 7 - byte.leading_zeros() as usize;
            Some((payload.len() - 1 - i) * 8 + high)
        })
        .ok_or_else(|| Error::Protocol("roster payload has no sentinel bit".into()))?;

    Ok((0..sentinel)
        .map(|i| get_bit(payload, sentinel - 1 - i))
        .collect())
}

// Bit positions count from the least significant bit of the last byte.
fn set_bit(buf: &mut [u8], bit: usize) {
    let last = buf.len() - 1;
    buf[last - bit / 8] |= 1 << (bit % 8);
}

fn get_bit(buf: &[u8], bit: usize) -> bool {
    let last = buf.len() - 1;
    (buf[last - bit / 8] >> (bit % 8)) & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_single_not_sitting() {
        assert_eq!(pack(&[false]), vec![0x02]);
    }

    #[test]
    fn test_pack_single_sitting() {
        assert_eq!(pack(&[true]), vec![0x03]);
    }

    #[test]
    fn test_pack_pair() {
        assert_eq!(pack(&[false, true]), vec![0x05]);
    }

    #[test]
    fn test_pack_seven() {
        let states = [false, false, true, false, true, false, true];
        assert_eq!(pack(&states), vec![0x95]);
    }

    #[test]
    fn test_pack_eight_spills_into_second_byte() {
        let states = [false, false, true, false, true, false, true, true];
        assert_eq!(pack(&states), vec![0x01, 0x2b]);
    }

    #[test]
    fn test_unpack_vectors() {
        assert_eq!(unpack(&[0x02]).unwrap(), vec![false]);
        assert_eq!(unpack(&[0x03]).unwrap(), vec![true]);
        assert_eq!(unpack(&[0x05]).unwrap(), vec![false, true]);
        assert_eq!(
            unpack(&[0x95]).unwrap(),
            vec![false, false, true, false, true, false, true]
        );
        assert_eq!(
            unpack(&[0x01, 0x2b]).unwrap(),
            vec![false, false, true, false, true, false, true, true]
        );
    }

    #[test]
    fn test_roundtrip_all_lengths() {
        for len in 1..=64usize {
            let states: Vec<bool> = (0..len).map(|i| (i * 7 + len) % 3 == 0).collect();
            let packed = pack(&states);
            assert_eq!(packed.len(), (len + 1 + 7) / 8);
            assert_eq!(unpack(&packed).unwrap(), states, "length {len}");
        }
    }

    #[test]
    fn test_unpack_no_sentinel() {
        assert!(matches!(unpack(&[0x00, 0x00]), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_unpack_empty() {
        assert!(matches!(unpack(&[]), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_sentinel_only_is_empty_roster() {
        assert_eq!(unpack(&[0x01]).unwrap(), Vec::<bool>::new());
    }
}
