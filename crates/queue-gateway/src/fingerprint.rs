use sha2::{Digest, Sha256};

/// Computes the RequestID the gateway assigns to a create request:
/// `fingerprint(reqPath, userID, payload)` per `SPEC_FULL.md` §4.D.
/// Stable across duplicate submissions of the same payload by the same
/// user to the same route, which is exactly the input the cache-idempotence
/// scenario (§8 S6) depends on.
pub fn request_id(req_path: &str, user_id: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(req_path.as_bytes());
    hasher.update(0u8.to_le_bytes()); // separator: no field may contain this byte unescaped
    hasher.update(user_id.as_bytes());
    hasher.update(0u8.to_le_bytes());
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_produce_identical_ids() {
        assert_eq!(
            request_id("/foo-request", "user-1", "payload"),
            request_id("/foo-request", "user-1", "payload"),
        );
    }

    #[test]
    fn differing_user_produces_differing_id() {
        assert_ne!(
            request_id("/foo-request", "user-1", "payload"),
            request_id("/foo-request", "user-2", "payload"),
        );
    }

    #[test]
    fn differing_payload_produces_differing_id() {
        assert_ne!(
            request_id("/foo-request", "user-1", "payload-a"),
            request_id("/foo-request", "user-1", "payload-b"),
        );
    }
}
