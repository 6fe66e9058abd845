use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of an HMAC-SHA256 tag.
pub const SIGNATURE_LEN: usize = 32;

/// Compute HMAC-SHA256(payload, key) over opaque bytes.
pub fn sign(payload: &[u8], key: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Hex-encoded form of [`sign`].
pub fn sign_hex(payload: &[u8], key: &[u8]) -> Result<String, anyhow::Error> {
    sign(payload, key).map(hex::encode)
}

/// Verify an HMAC-SHA256 tag using constant-time comparison.
///
/// A tag of the wrong length is rejected without comparing.
pub fn verify(payload: &[u8], signature: &[u8], key: &[u8]) -> Result<bool, anyhow::Error> {
    let expected = sign(payload, key)?;

    if expected.len() != signature.len() {
        return Ok(false);
    }

    Ok(expected.ct_eq(signature).into())
}
