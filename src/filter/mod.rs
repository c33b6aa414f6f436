//! Bloom filter primitive used as the per-key value of the cache.
//!
//! A filter is fixed to the [`FilterParams`] it was created with.  Its byte
//! form (see [`BloomFilter::to_bytes`]) records those parameters next to the
//! raw bit array so that restoring state written under different parameters
//! is detected instead of silently producing wrong answers.

mod hash;

use bincode::Options;
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// Fixed shape of every filter in one cache instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Bit-array size (m).
    pub bits: u64,
    /// Number of hash functions (k).
    pub hashes: u32,
}

impl FilterParams {
    /// Creates validated parameters.
    pub fn new(bits: u64, hashes: u32) -> Result<Self, FilterError> {
        let params = FilterParams { bits, hashes };
        params.validate()?;
        Ok(params)
    }

    /// Checks that a filter of this shape can exist: `bits` and `hashes`
    /// are nonzero and `bits` fits in one addressable bit vector.
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.bits == 0 {
            return Err(FilterError::ZeroBits);
        }
        if self.hashes == 0 {
            return Err(FilterError::ZeroHashes);
        }
        let max = BitSlice::<u8, Lsb0>::MAX_BITS;
        match usize::try_from(self.bits) {
            Ok(bits) if bits <= max => Ok(()),
            _ => Err(FilterError::TooManyBits {
                bits: self.bits,
                max: max as u64,
            }),
        }
    }

    /// Bytes needed to hold the bit array.
    fn byte_len(&self) -> usize {
        self.bits.div_ceil(8) as usize
    }
}

impl Default for FilterParams {
    /// 1 Mi bits and 5 hash functions.
    fn default() -> Self {
        FilterParams {
            bits: 1 << 20,
            hashes: 5,
        }
    }
}

/// Serialized layout.  `WireRef` and `Wire` must keep identical field order.
#[derive(Serialize)]
struct WireRef<'a> {
    bits: u64,
    hashes: u32,
    raw: &'a [u8],
}

#[derive(Deserialize)]
struct Wire {
    bits: u64,
    hashes: u32,
    raw: Vec<u8>,
}

/// Header bytes ahead of the raw bit array: m (8), k (4), length prefix (8).
const HEADER_LEN: u64 = 20;

fn wire_options(params: &FilterParams) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(HEADER_LEN + params.byte_len() as u64)
        .reject_trailing_bytes()
}

/// A standard Bloom filter over byte-string items.
///
/// `test` never returns `false` for an item that was added to this filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    bits: BitVec<u8, Lsb0>,
    params: FilterParams,
}

impl BloomFilter {
    /// Creates an empty filter, rejecting parameters that fail
    /// [`FilterParams::validate`].
    pub fn new(params: FilterParams) -> Result<Self, FilterError> {
        params.validate()?;
        Ok(BloomFilter {
            bits: bitvec![u8, Lsb0; 0; params.bits as usize],
            params,
        })
    }

    pub fn params(&self) -> FilterParams {
        self.params
    }

    /// Returns `true` if `item` may have been added.
    pub fn test(&self, item: &[u8]) -> bool {
        hash::positions(item, self.params.hashes, self.params.bits).all(|pos| self.bits[pos])
    }

    pub fn add(&mut self, item: &[u8]) {
        for pos in hash::positions(item, self.params.hashes, self.params.bits) {
            self.bits.set(pos, true);
        }
    }

    /// Adds `item` and reports whether it was (probably) present before.
    pub fn test_and_add(&mut self, item: &[u8]) -> bool {
        let mut present = true;
        for pos in hash::positions(item, self.params.hashes, self.params.bits) {
            if !self.bits.replace(pos, true) {
                present = false;
            }
        }
        present
    }

    /// Number of set bits.
    pub fn bits_set(&self) -> usize {
        self.bits.count_ones()
    }

    /// Encodes the filter.  [`from_bytes`](Self::from_bytes) with the same
    /// parameters restores it exactly.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FilterError> {
        let wire = WireRef {
            bits: self.params.bits,
            hashes: self.params.hashes,
            raw: self.bits.as_raw_slice(),
        };
        wire_options(&self.params)
            .serialize(&wire)
            .map_err(FilterError::Encode)
    }

    /// Decodes bytes produced by [`to_bytes`](Self::to_bytes), rejecting
    /// anything not written under `params`.
    pub fn from_bytes(bytes: &[u8], params: FilterParams) -> Result<Self, FilterError> {
        params.validate()?;
        let wire: Wire = wire_options(&params)
            .deserialize(bytes)
            .map_err(FilterError::Decode)?;

        if wire.bits != params.bits || wire.hashes != params.hashes {
            return Err(FilterError::ParamMismatch {
                expected_bits: params.bits,
                expected_hashes: params.hashes,
                found_bits: wire.bits,
                found_hashes: wire.hashes,
            });
        }
        if wire.raw.len() != params.byte_len() {
            return Err(FilterError::Truncated {
                expected: params.byte_len(),
                found: wire.raw.len(),
            });
        }

        let mut bits = BitVec::<u8, Lsb0>::from_vec(wire.raw);
        bits.truncate(params.bits as usize);
        Ok(BloomFilter { bits, params })
    }
}
