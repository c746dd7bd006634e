use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh, time-ordered 16-byte conversation id.
///
/// Layout matches UUIDv7: a 48-bit big-endian millisecond timestamp, a
/// 4-bit version nibble set to `0111`, a 2-bit variant set to `10`, and the
/// remaining 74 bits filled with process-local randomness. Two ids generated
/// in succession within the same millisecond still compare non-decreasing by
/// timestamp, matching the ordering property callers rely on.
pub fn generate_conversation_id() -> [u8; 16] {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64;

    let mut bytes = [0u8; 16];
    bytes[0] = (millis >> 40) as u8;
    bytes[1] = (millis >> 32) as u8;
    bytes[2] = (millis >> 24) as u8;
    bytes[3] = (millis >> 16) as u8;
    bytes[4] = (millis >> 8) as u8;
    bytes[5] = millis as u8;

    let rand_hi = random_u64();
    let rand_lo = random_u64();

    // byte 6: version nibble (0111) high, 4 random bits low
    bytes[6] = 0x70 | ((rand_hi >> 60) as u8 & 0x0f);
    bytes[7] = (rand_hi >> 52) as u8;
    // byte 8: variant bits (10) high, 6 random bits low
    bytes[8] = 0x80 | ((rand_hi >> 46) as u8 & 0x3f);
    bytes[9] = (rand_hi >> 38) as u8;
    bytes[10] = (rand_hi >> 30) as u8;
    bytes[11] = (rand_hi >> 22) as u8;
    bytes[12] = (rand_hi >> 14) as u8;
    bytes[13] = (rand_lo >> 16) as u8;
    bytes[14] = (rand_lo >> 8) as u8;
    bytes[15] = rand_lo as u8;

    bytes
}

/// Recover the millisecond timestamp embedded in a conversation id.
pub fn conversation_id_timestamp_ms(cid: &[u8; 16]) -> u64 {
    (cid[0] as u64) << 40
        | (cid[1] as u64) << 32
        | (cid[2] as u64) << 24
        | (cid[3] as u64) << 16
        | (cid[4] as u64) << 8
        | (cid[5] as u64)
}

fn random_u64() -> u64 {
    // No external RNG dependency: `RandomState::new()` draws a fresh key
    // from the OS entropy pool on every call, so hashing a local stack
    // address (ASLR) plus a monotonic counter through it yields
    // process-local randomness good enough for id tail bits.
    let marker = 0u8;
    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_usize(&marker as *const u8 as usize);
    hasher.write_u64(COUNTER.fetch_add(1, Ordering::Relaxed));
    hasher.write_u128(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_ids_are_sixteen_bytes() {
        let cid = generate_conversation_id();
        assert_eq!(cid.len(), 16);
    }

    #[test]
    fn version_and_variant_nibbles_are_set() {
        let cid = generate_conversation_id();
        assert_eq!(cid[6] & 0xf0, 0x70);
        assert_eq!(cid[8] & 0xc0, 0x80);
    }

    #[test]
    fn successive_ids_are_non_decreasing_in_timestamp() {
        let a = generate_conversation_id();
        let b = generate_conversation_id();
        assert!(conversation_id_timestamp_ms(&b) >= conversation_id_timestamp_ms(&a));
    }

    #[test]
    fn timestamp_round_trips_through_real_clock() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let cid = generate_conversation_id();
        let after = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let ts = conversation_id_timestamp_ms(&cid);
        assert!(ts >= before && ts <= after);
    }
}
