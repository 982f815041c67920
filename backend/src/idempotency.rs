//! Idempotency keys for checkout-session creation.
//!
//! Uses HMAC-SHA256 keyed by the processor secret so that the same purchase
//! attempt always maps to the same key (the processor de-duplicates retries)
//! while keys stay unguessable to anyone without the secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex idempotency key for one session-creation request.
///
/// ```text
/// key = HMAC-SHA256(secret, caller || 0x00 || attempt || 0x00 || request)
/// ```
///
/// `request` is the canonical form-encoded session request, so any change to
/// the cart or redirect URLs yields a different key.
pub fn checkout_key(secret: &[u8], caller: &str, attempt: &str, request: &[(String, String)]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any size");

    mac.update(caller.as_bytes());
    mac.update(&[0]);
    mac.update(attempt.as_bytes());
    mac.update(&[0]);
    for (name, value) in request {
        mac.update(name.as_bytes());
        mac.update(b"=");
        mac.update(value.as_bytes());
        mac.update(b"&");
    }

    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
