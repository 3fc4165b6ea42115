//! Shared access signature tokens for device channels.

use crate::error::SasError;
use base64::engine::general_purpose;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use leafbridge_core::DeviceCredential;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Resource URI of a device: `{host}/devices/{device_id}`.
pub fn device_resource_uri(host: &str, device_id: &str) -> String {
    format!("{}/devices/{}", host, device_id)
}

/// Build a SAS token for `resource_uri`, valid until `expiry` (Unix seconds).
///
/// `key` is the base64 symmetric key. The signed string is the URL-encoded
/// resource, a newline and the expiry.
pub fn generate_sas_token(resource_uri: &str, key: &str, expiry: u64) -> Result<String, SasError> {
    let encoded_resource = urlencoding::encode(resource_uri);
    let to_sign = format!("{}\n{}", encoded_resource, expiry);

    let key_bytes = Zeroizing::new(general_purpose::STANDARD.decode(key)?);
    let mut mac =
        HmacSha256::new_from_slice(key_bytes.as_slice()).map_err(|_| SasError::InvalidKeyLength)?;
    mac.update(to_sign.as_bytes());
    let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        encoded_resource,
        urlencoding::encode(&signature),
        expiry
    ))
}

/// Token for `credential` on `host`, valid for `ttl` from now.
pub fn device_sas_token(
    host: &str,
    credential: &DeviceCredential,
    ttl: Duration,
) -> Result<String, SasError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    generate_sas_token(
        &device_resource_uri(host, credential.device_id()),
        credential.key(),
        now + ttl.as_secs(),
    )
}
