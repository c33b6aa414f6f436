//! Bit-position derivation for the Bloom filter.
//!
//! Two MurmurHash3 (x64, 128-bit) digests with different seeds are combined
//! with double hashing, `g_i(x) = h1(x) + i * h2(x)`, so `k` positions cost
//! two hash evaluations regardless of `k`.

use std::io::Cursor;

/// Lower 64 bits of MurmurHash3 x64/128 of `item` under `seed`.
fn murmur64(item: &[u8], seed: u32) -> u64 {
    let mut cursor = Cursor::new(item);
    // Reading from an in-memory cursor cannot fail.
    murmur3::murmur3_x64_128(&mut cursor, seed).unwrap_or(0) as u64
}

/// Yields the `k` bit positions (each `< m`) that `item` maps to.
pub(crate) fn positions(item: &[u8], k: u32, m: u64) -> impl Iterator<Item = usize> {
    let h1 = murmur64(item, 0);
    let h2 = murmur64(item, 1);
    (0..u64::from(k)).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
}
