//! Dense 64-bit keys from arbitrary identifiers.
//!
//! The high 32 bits are an XXH32 digest of the UTF-8 bytes seeded with the byte
//! length; the low 32 bits are the classic `31 * h + c` string hash over UTF-16
//! code units. The two are independent enough that near-duplicate identifiers
//! (same length, one character apart) still land far apart.
//!
//! Persisted stores are addressed by these keys, so every constant here is
//! load-bearing. Do not change the mix.

const PRIME1: u32 = 0x9E37_79B1;
const PRIME2: u32 = 0x85EB_CA77;
const PRIME3: u32 = 0xC2B2_AE3D;
const PRIME4: u32 = 0x27D4_EB2F;
const PRIME5: u32 = 0x1656_67B1;

#[inline]
fn read_u32_le(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[inline]
fn round(acc: u32, lane: u32) -> u32 {
    acc.wrapping_add(lane.wrapping_mul(PRIME2))
        .rotate_left(13)
        .wrapping_mul(PRIME1)
}

/// XXH32 of `buf` with the given seed.
pub fn xxh32(buf: &[u8], seed: u32) -> u32 {
    let len = buf.len();
    let mut off = 0usize;

    let mut h32 = if len >= 16 {
        let limit = len - 16;
        let mut v1 = seed.wrapping_add(PRIME1).wrapping_add(PRIME2);
        let mut v2 = seed.wrapping_add(PRIME2);
        let mut v3 = seed;
        let mut v4 = seed.wrapping_sub(PRIME1);

        loop {
            v1 = round(v1, read_u32_le(buf, off));
            v2 = round(v2, read_u32_le(buf, off + 4));
            v3 = round(v3, read_u32_le(buf, off + 8));
            v4 = round(v4, read_u32_le(buf, off + 12));
            off += 16;
            if off > limit {
                break;
            }
        }

        v1.rotate_left(1)
            .wrapping_add(v2.rotate_left(7))
            .wrapping_add(v3.rotate_left(12))
            .wrapping_add(v4.rotate_left(18))
    } else {
        seed.wrapping_add(PRIME5)
    };

    h32 = h32.wrapping_add(len as u32);

    while off + 4 <= len {
        h32 = h32.wrapping_add(read_u32_le(buf, off).wrapping_mul(PRIME3));
        h32 = h32.rotate_left(17).wrapping_mul(PRIME4);
        off += 4;
    }

    while off < len {
        h32 = h32.wrapping_add((buf[off] as u32).wrapping_mul(PRIME5));
        h32 = h32.rotate_left(11).wrapping_mul(PRIME1);
        off += 1;
    }

    h32 ^= h32 >> 15;
    h32 = h32.wrapping_mul(PRIME2);
    h32 ^= h32 >> 13;
    h32 = h32.wrapping_mul(PRIME3);
    h32 ^= h32 >> 16;
    h32
}

/// `31 * h + c` over UTF-16 code units.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}

/// Map an identifier to its dense store key.
///
/// Total and deterministic; the empty identifier maps to `0`. The result always
/// has the top bit clear.
pub fn dense_key(identifier: &str) -> u64 {
    if identifier.is_empty() {
        return 0;
    }

    let bytes = identifier.as_bytes();
    let h1 = (xxh32(bytes, bytes.len() as u32) as i32).wrapping_abs();
    let h2 = string_hash(identifier) as u32;

    let packed = ((h1 as i64) << 32) | h2 as i64;
    // Only reachable when h1 == i32::MIN.
    packed.wrapping_abs() as u64
}

/// One-way digest of a data item, for later equality comparison without
/// keeping the item itself.
pub fn obscure(item: &str) -> i32 {
    let bytes = item.as_bytes();
    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return 0;
    };

    let seed = (bytes.len() as i32)
        .wrapping_mul(first as i8 as i32)
        .wrapping_mul(last as i8 as i32);

    (xxh32(bytes, seed as u32) as i32).wrapping_abs()
}
