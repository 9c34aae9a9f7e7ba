use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use thiserror::Error;

/// The opaque string embedded in download/stream URLs. Decodes to a
/// platform message id. This is obfuscation, not authentication: anyone
/// holding the string can fetch the file it names.
pub type FileReference = String;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid file reference")]
pub struct InvalidReference;

// splitmix64's constants: both are fixed, non-secret bit patterns chosen
// only to scatter consecutive message ids across the base64 alphabet, not
// for any cryptographic property.
const OFFSET: u64 = 0x9E37_79B9_7F4A_7C15;
const XOR_MASK: u64 = 0xBF58_476D_1CE4_E5B9;

const _: () = assert!(OFFSET % 2 == 1, "OFFSET must be odd to be invertible mod 2^64");
const _: () = assert!(XOR_MASK != 0, "XOR_MASK must be nonzero");

/// Modular inverse of an odd `x` modulo 2^64, via Newton's iteration.
/// Each pass doubles the number of correct low bits (starting from 3),
/// so six passes are enough to converge for a 64-bit modulus.
const fn mod_inverse_odd(x: u64) -> u64 {
    let mut y = x;
    let mut i = 0;
    while i < 6 {
        y = y.wrapping_mul(2u64.wrapping_sub(x.wrapping_mul(y)));
        i += 1;
    }
    y
}

const OFFSET_INV: u64 = mod_inverse_odd(OFFSET);

const _: () = assert!(OFFSET.wrapping_mul(OFFSET_INV) == 1, "OFFSET_INV must invert OFFSET");

/// Largest message id the codec will accept: the result must be
/// representable in 63 bits (nonnegative, fits an `i64`).
const MAX_MESSAGE_ID: u64 = (1u64 << 63) - 1;

pub fn encode(message_id: u64) -> Result<FileReference, InvalidReference> {
    if message_id > MAX_MESSAGE_ID {
        return Err(InvalidReference);
    }

    let scrambled = message_id.wrapping_mul(OFFSET) ^ XOR_MASK;

    Ok(URL_SAFE_NO_PAD.encode(scrambled.to_be_bytes()))
}

pub fn decode(reference: &str) -> Result<u64, InvalidReference> {
    let bytes = URL_SAFE_NO_PAD
        .decode(reference)
        .map_err(|_| InvalidReference)?;

    let bytes: [u8; 8] = bytes.try_into().map_err(|_| InvalidReference)?;

    let scrambled = u64::from_be_bytes(bytes);
    let message_id = (scrambled ^ XOR_MASK).wrapping_mul(OFFSET_INV);

    if message_id > MAX_MESSAGE_ID {
        return Err(InvalidReference);
    }

    Ok(message_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_zero() {
        let encoded = encode(0).unwrap();
        assert_eq!(decode(&encoded).unwrap(), 0);
    }

    #[test]
    fn round_trip_max() {
        let encoded = encode(MAX_MESSAGE_ID).unwrap();
        assert_eq!(decode(&encoded).unwrap(), MAX_MESSAGE_ID);
    }

    #[test]
    fn rejects_oversized_message_id() {
        assert_eq!(encode(MAX_MESSAGE_ID + 1), Err(InvalidReference));
    }

    #[test]
    fn rejects_garbage_input() {
        assert_eq!(decode("not valid base64!!"), Err(InvalidReference));
        assert_eq!(decode(""), Err(InvalidReference));
        assert_eq!(decode("QQ"), Err(InvalidReference));
    }

    #[test]
    fn distinct_ids_encode_distinctly() {
        let a = encode(12345).unwrap();
        let b = encode(12346).unwrap();
        assert_ne!(a, b);
    }
}
