//! Adler-32 weak checksum, used to cheaply narrow the candidate set before
//! paying for a SHA-256 strong-hash comparison.

const MOD_ADLER: u32 = 65521;

#[must_use]
pub fn adler32(data: &[u8]) -> u32 {
    let mut a = 1u32;
    let mut b = 0u32;
    for &byte in data {
        a = (a + u32::from(byte)) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(adler32(b"swarm-sync"), adler32(b"swarm-sync"));
    }

    #[test]
    fn differs_on_different_input() {
        assert_ne!(adler32(b"abc"), adler32(b"abd"));
    }

    #[test]
    fn empty_input_is_one() {
        assert_eq!(adler32(b""), 1);
    }
}
