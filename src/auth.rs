use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::ApiCredentials;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signature for Polymarket CLOB L2 auth.
///
/// Message format: timestamp + METHOD + path + body, keyed with the
/// URL-safe base64 decoded secret.
pub fn generate_signature(
    secret: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String> {
    let secret_bytes = BASE64.decode(secret).context("API secret is not base64")?;

    let message = format!("{}{}{}{}", timestamp, method.to_uppercase(), path, body);

    let mut mac = HmacSha256::new_from_slice(&secret_bytes)?;
    mac.update(message.as_bytes());

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Current unix time in seconds
pub fn get_timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// All L2 auth headers for one CLOB request
pub fn generate_headers(
    credentials: &ApiCredentials,
    method: &str,
    path: &str,
    body: &str,
) -> Result<Vec<(String, String)>> {
    let timestamp = get_timestamp();
    let signature = generate_signature(&credentials.api_secret, &timestamp, method, path, body)?;

    Ok(vec![
        // Header names use underscores
        ("POLY_ADDRESS".to_string(), credentials.address.clone()),
        ("POLY_API_KEY".to_string(), credentials.api_key.clone()),
        ("POLY_PASSPHRASE".to_string(), credentials.api_passphrase.clone()),
        ("POLY_TIMESTAMP".to_string(), timestamp),
        ("POLY_SIGNATURE".to_string(), signature),
        ("Content-Type".to_string(), "application/json".to_string()),
    ])
}
