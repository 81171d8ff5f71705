//! Key hashing for the extensible hash index
//!
//! Every bit computation in the index uses the low-order bits of the hash:
//! the directory slot of a key is its hash masked to the global depth, and a
//! split at new local depth `d` partitions on bit `d - 1`.
use twox_hash::XxHash64;

use crate::record::Constant;

const HASH_SEED: u64 = 0;

const INT_TAG: u8 = 0;
const STR_TAG: u8 = 1;

/// Hashes a key into the 64 bit space the directory indexes
pub fn hash_constant(key: &Constant) -> u64 {
    let mut bytes = Vec::with_capacity(8);
    match key {
        Constant::Int(v) => {
            bytes.push(INT_TAG);
            bytes.extend(v.to_le_bytes());
        }
        Constant::Str(s) => {
            bytes.push(STR_TAG);
            bytes.extend(s.as_bytes());
        }
    }
    XxHash64::oneshot(HASH_SEED, &bytes)
}

/// Mask keeping the low `depth` bits
pub fn mask(depth: u32) -> u64 {
    if depth >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << depth) - 1
    }
}

/// The low `depth` bits of `hash`
pub fn suffix(hash: u64, depth: u32) -> u64 {
    hash & mask(depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_stable_and_typed() {
        assert_eq!(
            hash_constant(&Constant::Int(42)),
            hash_constant(&Constant::Int(42))
        );
        assert_ne!(
            hash_constant(&Constant::Int(42)),
            hash_constant(&Constant::Int(43))
        );
        assert_ne!(
            hash_constant(&Constant::from("42")),
            hash_constant(&Constant::Int(42))
        );
    }

    #[test]
    fn suffix_keeps_low_bits() {
        assert_eq!(mask(0), 0);
        assert_eq!(mask(3), 0b111);
        assert_eq!(mask(64), u64::MAX);
        assert_eq!(suffix(0b1011_0110, 0), 0);
        assert_eq!(suffix(0b1011_0110, 3), 0b110);
        assert_eq!(suffix(0b1011_0110, 5), 0b10110);
    }
}
