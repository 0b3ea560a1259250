use xxhash_rust::xxh64::Xxh64;

use crate::array::Ints;

/// Hash width of directories created without the wide-hash flag.
pub const HASH_BITS: u32 = 28;
/// Hash width of directories created with the wide-hash flag.
pub const HASH_BITS_WIDE: u32 = 48;

/// Salted hash of an entry name, keeping the top `hash_bits` bits
/// (clamped to `1..=64`) and zeroing the rest.
///
/// The leaf never hashes names itself. Owning directories pick the salt and
/// width once and must pass the same values for the life of the directory.
pub fn zap_hash(salt: u64, name: Ints<'_>, hash_bits: u32) -> u64 {
    let mut hasher = Xxh64::new(salt);
    match name {
        Ints::U8(bytes) => hasher.update(bytes),
        Ints::U16(v) => v.iter().for_each(|x| hasher.update(&x.to_be_bytes())),
        Ints::U32(v) => v.iter().for_each(|x| hasher.update(&x.to_be_bytes())),
        Ints::U64(v) => v.iter().for_each(|x| hasher.update(&x.to_be_bytes())),
    }
    let bits = hash_bits.clamp(1, 64);
    hasher.digest() & u64::MAX.checked_shl(64 - bits).unwrap_or(0)
}
