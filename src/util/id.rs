use std::time::{Duration, SystemTime};

/// Random lowercase hex identifier of `bytes * 2` characters.
/// Falls back to a time/pid mix when the OS RNG is unavailable.
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    if getrandom::getrandom(&mut buf).is_err() {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_nanos();
        let mix = now ^ (std::process::id() as u128).rotate_left(64);
        let seed = mix.to_le_bytes();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = seed[i % seed.len()].wrapping_add(i as u8);
        }
    }
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `chatcmpl-<24 hex>` style id used for completion objects.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", random_hex(12))
}

/// `call_<16 hex>` id for executed tool calls.
pub fn tool_call_id() -> String {
    format!("call_{}", random_hex(8))
}

/// Trace identifier (16 hex).
pub fn trace_id() -> String {
    random_hex(8)
}

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

/// Milliseconds since the unix epoch.
pub fn unix_now_ms() -> u128 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_have_expected_shape() {
        let id = completion_id();
        assert!(id.starts_with("chatcmpl-"));
        assert_eq!(id.len(), "chatcmpl-".len() + 24);
        assert!(tool_call_id().starts_with("call_"));
        assert_eq!(trace_id().len(), 16);
        assert_ne!(trace_id(), trace_id());
    }
}
