//! Webhook body signing.
//!
//! Every delivery carries the raw process secret in the `signature`
//! header. When HMAC signing is enabled the body is additionally signed
//! and the hex digest sent as `signature-sha256`, so receivers can verify
//! integrity without the secret ever being transmitted.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header carrying the raw process secret.
pub const SIGNATURE_HEADER: &str = "signature";

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const HMAC_SIGNATURE_HEADER: &str = "signature-sha256";

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 of `body` keyed by `secret`.
pub fn compute_body_hmac(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex_encode(&mac.finalize().into_bytes())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
