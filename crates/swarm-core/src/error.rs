//! Parse errors shared by identifier and hash decoding across the workspace.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid hex encoding")]
    InvalidHex,

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Decode a fixed-size byte array from a hex string, accepting an optional
/// `0x`/`0X` prefix.
pub fn parse_fixed_array<const N: usize>(s: &str) -> Result<[u8; N], ParseError> {
    let trimmed = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    let bytes = hex::decode(trimmed).map_err(|_| ParseError::InvalidHex)?;
    if bytes.len() != N {
        return Err(ParseError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_0x_prefix() {
        let got: [u8; 2] = parse_fixed_array("0xabcd").unwrap();
        assert_eq!(got, [0xab, 0xcd]);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = parse_fixed_array::<4>("abcd").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidLength {
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn rejects_non_hex() {
        assert_eq!(
            parse_fixed_array::<2>("zzzz").unwrap_err(),
            ParseError::InvalidHex
        );
    }
}
