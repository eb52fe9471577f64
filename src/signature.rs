use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex length of an HMAC-SHA256 digest.
pub const SIGNATURE_LEN: usize = 64;

/// Handshake signature: `hex(HMAC-SHA256(secret, "client_id,session_id,stream_id"))`.
///
/// Callers must have validated `secret` as non-empty (see `Config::validate`).
pub fn sign(client_id: &str, session_id: &str, stream_id: &str, secret: &str) -> String {
    let message = format!("{client_id},{session_id},{stream_id}");
    hmac_hex(secret.as_bytes(), message.as_bytes())
}

/// Digest used to answer webhook URL validation challenges.
pub fn url_validation_token(secret_token: &str, plain_token: &str) -> String {
    hmac_hex(secret_token.as_bytes(), plain_token.as_bytes())
}

fn hmac_hex(key: &[u8], msg: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(msg);
    hex::encode(mac.finalize().into_bytes())
}
