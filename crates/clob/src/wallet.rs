//! Signer identity for order and auth signing.
//!
//! Two authentication modes exist on this venue:
//!
//! - **EOA**: the signer address is also the funder; signature type 0.
//! - **Proxy**: the signer signs on behalf of a Gnosis-Safe funder
//!   address; signature type 2. The funder must be supplied at
//!   construction, and maker/funder fields in signed orders use it.
//!
//! The private key is held in a `SecretString`: never printed by Debug,
//! never logged, zeroized on drop.

use secrecy::{ExposeSecret, SecretString};
use splitflip_core::config::{AuthMode, WalletSettings};
use thiserror::Error;

/// Expected length of a hex-encoded private key (without 0x prefix).
const PRIVATE_KEY_HEX_LEN: usize = 64;

/// Errors that can occur when working with the wallet.
#[derive(Debug, Error)]
pub enum WalletError {
    /// Private key missing from configuration/environment.
    #[error("missing private key (set SPLITFLIP_WALLET__PRIVATE_KEY)")]
    MissingKey,

    /// Private key has invalid format.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Proxy mode selected without a funder address.
    #[error("proxy auth mode requires a funder address")]
    MissingFunder,

    /// Signing operation failed.
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// On-chain signature type tag carried in signed orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// Direct owner; signer == funder. Wire value 0.
    Eoa,
    /// Gnosis-Safe proxy; signer signs for the funder. Wire value 2.
    PolyGnosisSafe,
}

impl SignatureKind {
    /// The numeric tag the exchange contract expects.
    #[must_use]
    pub const fn wire_value(self) -> u8 {
        match self {
            Self::Eoa => 0,
            Self::PolyGnosisSafe => 2,
        }
    }
}

/// Secure wallet for order and auth signing.
pub struct Wallet {
    /// SECURITY: never log or expose this value.
    private_key: SecretString,
    /// Derived signer address (EIP-55 checksummed).
    address: String,
    /// Funder address: the signer itself in EOA mode, the Safe in
    /// proxy mode.
    funder: String,
    signature_kind: SignatureKind,
    chain_id: u64,
}

impl Wallet {
    /// Builds a wallet from settings, deriving the signer address from
    /// the private key.
    ///
    /// # Errors
    ///
    /// - `WalletError::MissingKey` if no private key is configured
    /// - `WalletError::InvalidPrivateKey` on a malformed key
    /// - `WalletError::MissingFunder` if proxy mode lacks a funder
    pub fn from_settings(settings: &WalletSettings, chain_id: u64) -> Result<Self, WalletError> {
        if settings.private_key.is_empty() {
            return Err(WalletError::MissingKey);
        }
        let key_hex = settings
            .private_key
            .strip_prefix("0x")
            .unwrap_or(&settings.private_key);
        if key_hex.len() != PRIVATE_KEY_HEX_LEN {
            return Err(WalletError::InvalidPrivateKey(format!(
                "key must be {} hex chars, got {}",
                PRIVATE_KEY_HEX_LEN,
                key_hex.len()
            )));
        }

        let address = derive_address(key_hex)?;
        let (funder, signature_kind) = match settings.auth_mode {
            AuthMode::Eoa => (address.clone(), SignatureKind::Eoa),
            AuthMode::Proxy => {
                let funder = settings
                    .funder
                    .clone()
                    .filter(|f| !f.is_empty())
                    .ok_or(WalletError::MissingFunder)?;
                (funder, SignatureKind::PolyGnosisSafe)
            }
        };

        Ok(Self {
            private_key: SecretString::from(key_hex.to_string()),
            address,
            funder,
            signature_kind,
            chain_id,
        })
    }

    /// The signer's Ethereum address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The funder address used as `maker` in signed orders.
    #[must_use]
    pub fn funder(&self) -> &str {
        &self.funder
    }

    #[must_use]
    pub fn signature_kind(&self) -> SignatureKind {
        self.signature_kind
    }

    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Signs a raw 32-byte hash, returning `0x{r}{s}{v}`.
    ///
    /// # Errors
    ///
    /// Returns `WalletError::SigningFailed` if ECDSA signing fails.
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<String, WalletError> {
        use k256::ecdsa::SigningKey;

        let key_bytes = hex::decode(self.private_key.expose_secret())
            .map_err(|e| WalletError::SigningFailed(format!("key decode: {e}")))?;
        let signing_key = SigningKey::from_slice(&key_bytes)
            .map_err(|e| WalletError::SigningFailed(format!("key parse: {e}")))?;

        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| WalletError::SigningFailed(format!("ECDSA sign: {e}")))?;

        let mut sig_bytes = Vec::with_capacity(65);
        sig_bytes.extend_from_slice(&signature.r().to_bytes());
        sig_bytes.extend_from_slice(&signature.s().to_bytes());
        sig_bytes.push(recovery_id.to_byte() + 27); // Ethereum convention

        Ok(format!("0x{}", hex::encode(sig_bytes)))
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .field("funder", &self.funder)
            .field("signature_kind", &self.signature_kind)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

/// Derives the EIP-55 checksummed address for a hex private key.
fn derive_address(key_hex: &str) -> Result<String, WalletError> {
    use k256::ecdsa::SigningKey;
    use sha3::{Digest, Keccak256};

    let key_bytes = hex::decode(key_hex)
        .map_err(|e| WalletError::InvalidPrivateKey(format!("invalid hex: {e}")))?;
    let signing_key = SigningKey::from_slice(&key_bytes)
        .map_err(|e| WalletError::InvalidPrivateKey(format!("invalid secp256k1 key: {e}")))?;

    // Uncompressed public key is 65 bytes: 0x04 || x || y. The address
    // is the last 20 bytes of keccak256(x || y).
    let verifying_key = signing_key.verifying_key();
    let public_key = verifying_key.to_encoded_point(false);
    let mut hasher = Keccak256::new();
    hasher.update(&public_key.as_bytes()[1..]);
    let hash = hasher.finalize();

    let address_bytes: [u8; 20] = hash[12..32]
        .try_into()
        .map_err(|_| WalletError::InvalidPrivateKey("hash too short".to_string()))?;

    Ok(eip55_checksum(&address_bytes))
}

/// Applies the EIP-55 mixed-case checksum to a raw address.
fn eip55_checksum(address: &[u8; 20]) -> String {
    use sha3::{Digest, Keccak256};

    let lower = hex::encode(address);
    let mut hasher = Keccak256::new();
    hasher.update(lower.as_bytes());
    let hash = hasher.finalize();

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
