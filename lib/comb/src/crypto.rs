use rand::rngs::OsRng;
use rand::RngCore;

pub const DIGEST_SIZE: usize = 16;

/// Draws a fresh 32-bit handshake challenge from the operating system RNG.
#[inline]
pub fn challenge() -> u32 {
    OsRng.next_u32()
}

/// Computes the handshake digest: MD5 over the cookie immediately followed by
/// the challenge printed as an unsigned base-10 integer, no separator.
#[inline]
pub fn digest(cookie: &str, challenge: u32) -> [u8; DIGEST_SIZE] {
    md5::compute(format!("{}{}", cookie, challenge)).0
}

/// Compares two digests without short-circuiting on the first differing byte.
#[inline]
pub fn digest_eq(a: &[u8; DIGEST_SIZE], b: &[u8; DIGEST_SIZE]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
