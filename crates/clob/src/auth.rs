//! CLOB authentication.
//!
//! Two layers, mirroring the venue's scheme:
//!
//! - **L1**: an EIP-712 `ClobAuth` attestation signed by the wallet,
//!   used once to derive API credentials. Credentials are reused across
//!   reconnects for the rest of the process lifetime.
//! - **L2**: per-request HMAC-SHA256 headers
//!   (`POLY_ADDRESS` / `POLY_API_KEY` / `POLY_PASSPHRASE` /
//!   `POLY_TIMESTAMP` / `POLY_SIGNATURE`) over
//!   `timestamp + method + path + body`.

use base64::{engine::general_purpose, Engine};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::eip712::compute_clob_auth_hash;
use crate::wallet::Wallet;

/// Errors from authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential derivation rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid API secret: {0}")]
    InvalidSecret(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Derived API credentials for the L2 auth layer and the user channel.
#[derive(Debug, Clone)]
pub struct ApiCreds {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

impl ApiCreds {
    /// Builds L2 headers for an authenticated request.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidSecret` if the secret is not valid
    /// URL-safe base64.
    pub fn l2_headers(
        &self,
        address: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<Vec<(String, String)>, AuthError> {
        let timestamp = unix_timestamp().to_string();
        let message = format!("{timestamp}{method}{path}{body}");

        let secret_bytes = general_purpose::URL_SAFE
            .decode(&self.api_secret)
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&secret_bytes)
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;
        mac.update(message.as_bytes());
        let signature = general_purpose::URL_SAFE.encode(mac.finalize().into_bytes());

        Ok(vec![
            ("POLY_ADDRESS".into(), address.to_string()),
            ("POLY_API_KEY".into(), self.api_key.clone()),
            ("POLY_PASSPHRASE".into(), self.passphrase.clone()),
            ("POLY_TIMESTAMP".into(), timestamp),
            ("POLY_SIGNATURE".into(), signature),
        ])
    }
}

#[derive(Debug, Deserialize)]
struct DeriveResponse {
    #[serde(rename = "apiKey")]
    api_key: String,
    secret: String,
    passphrase: String,
}

/// Derives API credentials from an L1 ClobAuth signature.
///
/// Tries `GET /auth/derive-api-key` first (idempotent for an existing
/// key) and falls back to `POST /auth/api-key` to create one.
///
/// # Errors
///
/// Fails on signing errors, network errors, or a rejection from both
/// endpoints.
pub async fn derive_api_creds(
    http: &reqwest::Client,
    base_url: &str,
    wallet: &Wallet,
) -> Result<ApiCreds, AuthError> {
    let timestamp = unix_timestamp().to_string();
    let nonce = 0u64;
    let hash = compute_clob_auth_hash(wallet.chain_id(), wallet.address(), &timestamp, nonce)
        .map_err(|e| AuthError::Signing(e.to_string()))?;
    let signature = wallet
        .sign_hash(&hash)
        .map_err(|e| AuthError::Signing(e.to_string()))?;

    let l1_headers = [
        ("POLY_ADDRESS", wallet.address().to_string()),
        ("POLY_SIGNATURE", signature),
        ("POLY_TIMESTAMP", timestamp),
        ("POLY_NONCE", nonce.to_string()),
    ];

    for (method, path) in [("GET", "/auth/derive-api-key"), ("POST", "/auth/api-key")] {
        let url = format!("{base_url}{path}");
        let mut req = match method {
            "GET" => http.get(&url),
            _ => http.post(&url),
        };
        for (k, v) in &l1_headers {
            req = req.header(*k, v);
        }

        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            let creds: DeriveResponse = response.json().await?;
            tracing::info!(address = %wallet.address(), "derived CLOB API credentials");
            return Ok(ApiCreds {
                api_key: creds.api_key,
                api_secret: creds.secret,
                passphrase: creds.passphrase,
            });
        }
        tracing::debug!(%method, %path, status = status.as_u16(), "credential endpoint declined");
    }

    Err(AuthError::Rejected {
        status: 0,
        message: "both derive and create endpoints declined".to_string(),
    })
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
