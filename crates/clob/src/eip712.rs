//! EIP-712 typed data signing for CTF Exchange orders.
//!
//! Implements the EIP-712 standard for signing Polymarket CTF Exchange
//! orders using k256 (secp256k1) ECDSA. No external SDK dependencies.
//!
//! # References
//!
//! - [EIP-712](https://eips.ethereum.org/EIPS/eip-712)
//! - [Polymarket CTF Exchange](https://github.com/Polymarket/ctf-exchange)

use rust_decimal::Decimal;
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::wallet::{Wallet, WalletError};

// =============================================================================
// Constants
// =============================================================================

/// EIP-712 domain name for the Polymarket CTF Exchange.
const DOMAIN_NAME: &str = "Polymarket CTF Exchange";

/// EIP-712 domain version.
const DOMAIN_VERSION: &str = "1";

/// Standard CTF Exchange contract on Polygon.
pub const STANDARD_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

/// Neg Risk CTF Exchange contract on Polygon.
pub const NEG_RISK_EXCHANGE: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";

/// EIP-712 domain name for ClobAuth messages.
pub const CLOB_AUTH_DOMAIN_NAME: &str = "ClobAuthDomain";

/// ClobAuth attestation message.
pub const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

/// USDC uses 6 decimal places.
const USDC_DECIMALS: u32 = 6;

/// Side: BUY = 0.
pub const SIDE_BUY: u8 = 0;

/// Side: SELL = 1.
pub const SIDE_SELL: u8 = 1;

/// Zero address (taker default).
const ZERO_ADDRESS: [u8; 20] = [0u8; 20];

// =============================================================================
// Errors
// =============================================================================

/// Errors from EIP-712 operations.
#[derive(Debug, Error)]
pub enum Eip712Error {
    /// Invalid address format.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Amount calculation error.
    #[error("amount calculation error: {0}")]
    AmountError(String),
}

impl From<WalletError> for Eip712Error {
    fn from(e: WalletError) -> Self {
        Eip712Error::SigningFailed(e.to_string())
    }
}

// =============================================================================
// Order struct
// =============================================================================

/// A CLOB order for EIP-712 signing.
///
/// Maps to the Solidity `Order` struct in the CTF Exchange contract.
/// `maker` is the funder (the Safe address in proxy mode); `signer` is
/// the key that produces the signature.
#[derive(Debug, Clone)]
pub struct Eip712Order {
    /// Random salt for uniqueness (small number matching SDK convention).
    pub salt: u64,
    /// Maker (funder) address.
    pub maker: [u8; 20],
    /// Signer address.
    pub signer: [u8; 20],
    /// Taker address (usually zero).
    pub taker: [u8; 20],
    /// ERC1155 conditional token ID (numeric string).
    pub token_id: String,
    /// Maximum amount maker spends (USDC, 6 decimals).
    pub maker_amount: u64,
    /// Minimum amount taker pays (USDC, 6 decimals).
    pub taker_amount: u64,
    /// Unix expiration timestamp (0 = no expiration).
    pub expiration: u64,
    /// Nonce for cancellation.
    pub nonce: u64,
    /// Fee rate in basis points.
    pub fee_rate_bps: u16,
    /// Order side: 0 = BUY, 1 = SELL.
    pub side: u8,
    /// Signature type: 0 = EOA, 2 = POLY_GNOSIS_SAFE.
    pub signature_type: u8,
}

// =============================================================================
// Hashing functions
// =============================================================================

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

fn keccak256_str(s: &str) -> [u8; 32] {
    keccak256(s.as_bytes())
}

/// EIP-712 domain type hash.
fn domain_type_hash() -> [u8; 32] {
    keccak256_str(
        "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    )
}

/// Order type hash matching the CTF Exchange Solidity contract.
fn order_type_hash() -> [u8; 32] {
    keccak256_str(
        "Order(uint256 salt,address maker,address signer,address taker,\
         uint256 tokenId,uint256 makerAmount,uint256 takerAmount,\
         uint256 expiration,uint256 nonce,uint256 feeRateBps,\
         uint8 side,uint8 signatureType)",
    )
}

/// ClobAuth type hash for authentication messages.
fn clob_auth_type_hash() -> [u8; 32] {
    keccak256_str("ClobAuth(address address,string timestamp,uint256 nonce,string message)")
}

/// Computes the EIP-712 domain separator.
///
/// `hash(domainTypeHash || hash(name) || hash(version) || chainId || verifyingContract)`
pub fn compute_domain_separator(
    chain_id: u64,
    exchange_address: &str,
) -> Result<[u8; 32], Eip712Error> {
    let contract_bytes = parse_address(exchange_address)?;

    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(&domain_type_hash());
    encoded.extend_from_slice(&keccak256_str(DOMAIN_NAME));
    encoded.extend_from_slice(&keccak256_str(DOMAIN_VERSION));
    encoded.extend_from_slice(&abi_encode_u256_from_u64(chain_id));
    encoded.extend_from_slice(&abi_encode_address(&contract_bytes));

    Ok(keccak256(&encoded))
}

/// EIP-712 domain type hash for ClobAuth (no verifyingContract field).
fn clob_auth_domain_type_hash() -> [u8; 32] {
    keccak256_str("EIP712Domain(string name,string version,uint256 chainId)")
}

/// Computes the ClobAuth domain separator (no verifyingContract).
pub fn compute_clob_auth_domain_separator(chain_id: u64) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(4 * 32);
    encoded.extend_from_slice(&clob_auth_domain_type_hash());
    encoded.extend_from_slice(&keccak256_str(CLOB_AUTH_DOMAIN_NAME));
    encoded.extend_from_slice(&keccak256_str(DOMAIN_VERSION));
    encoded.extend_from_slice(&abi_encode_u256_from_u64(chain_id));

    keccak256(&encoded)
}

/// Computes the signing hash for a ClobAuth attestation.
pub fn compute_clob_auth_hash(
    chain_id: u64,
    address: &str,
    timestamp: &str,
    nonce: u64,
) -> Result<[u8; 32], Eip712Error> {
    let address_bytes = parse_address(address)?;

    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(&clob_auth_type_hash());
    encoded.extend_from_slice(&abi_encode_address(&address_bytes));
    encoded.extend_from_slice(&keccak256_str(timestamp));
    encoded.extend_from_slice(&abi_encode_u256_from_u64(nonce));
    encoded.extend_from_slice(&keccak256_str(CLOB_AUTH_MESSAGE));
    let struct_hash = keccak256(&encoded);

    let domain_separator = compute_clob_auth_domain_separator(chain_id);
    Ok(compute_signing_hash(&domain_separator, &struct_hash))
}

/// Computes the struct hash for an Order.
///
/// `hash(ORDER_TYPEHASH || abi_encode(field1, field2, ...))`
pub fn compute_order_struct_hash(order: &Eip712Order) -> [u8; 32] {
    let token_id_u256 = token_id_to_u256(&order.token_id);

    let mut encoded = Vec::with_capacity(13 * 32);
    encoded.extend_from_slice(&order_type_hash());
    encoded.extend_from_slice(&abi_encode_u256_from_u64(order.salt));
    encoded.extend_from_slice(&abi_encode_address(&order.maker));
    encoded.extend_from_slice(&abi_encode_address(&order.signer));
    encoded.extend_from_slice(&abi_encode_address(&order.taker));
    encoded.extend_from_slice(&token_id_u256);
    encoded.extend_from_slice(&abi_encode_u256_from_u64(order.maker_amount));
    encoded.extend_from_slice(&abi_encode_u256_from_u64(order.taker_amount));
    encoded.extend_from_slice(&abi_encode_u256_from_u64(order.expiration));
    encoded.extend_from_slice(&abi_encode_u256_from_u64(order.nonce));
    encoded.extend_from_slice(&abi_encode_u256_from_u64(order.fee_rate_bps as u64));
    encoded.extend_from_slice(&abi_encode_u256_from_u64(order.side as u64));
    encoded.extend_from_slice(&abi_encode_u256_from_u64(order.signature_type as u64));

    keccak256(&encoded)
}

/// Computes the final EIP-712 signing hash.
///
/// `keccak256("\x19\x01" || domainSeparator || structHash)`
pub fn compute_signing_hash(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    let mut data = Vec::with_capacity(2 + 32 + 32);
    data.push(0x19);
    data.push(0x01);
    data.extend_from_slice(domain_separator);
    data.extend_from_slice(struct_hash);
    keccak256(&data)
}

// =============================================================================
// Signing
// =============================================================================

/// Signs an order with the wallet against the given exchange contract.
///
/// Returns the hex-encoded signature string `0x{r}{s}{v}`.
pub fn sign_order(
    order: &Eip712Order,
    wallet: &Wallet,
    neg_risk: bool,
) -> Result<String, Eip712Error> {
    let exchange = if neg_risk { NEG_RISK_EXCHANGE } else { STANDARD_EXCHANGE };
    let domain_separator = compute_domain_separator(wallet.chain_id(), exchange)?;
    let struct_hash = compute_order_struct_hash(order);
    let signing_hash = compute_signing_hash(&domain_separator, &struct_hash);
    Ok(wallet.sign_hash(&signing_hash)?)
}

// =============================================================================
// Amount calculations
// =============================================================================

/// Calculates maker and taker amounts from price and size.
///
/// Amounts are in USDC raw units (6 decimals, so $1.00 = 1_000_000).
///
/// Matches the venue SDK's rounding for $0.01 tick markets:
/// price 2dp (half-up), size 2dp (down); the 4dp product needs no
/// further rounding.
///
/// - BUY: taker_amount = size (shares received), maker_amount = size * price (USDC paid)
/// - SELL: maker_amount = size (shares given), taker_amount = size * price (USDC received)
pub fn calculate_amounts(
    side: u8,
    price: Decimal,
    size: Decimal,
) -> Result<(u64, u64), Eip712Error> {
    let scale = Decimal::from(10u64.pow(USDC_DECIMALS));

    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return Err(Eip712Error::AmountError(format!(
            "price must be in (0, 1), got {price}"
        )));
    }
    if size <= Decimal::ZERO {
        return Err(Eip712Error::AmountError("size must be positive".to_string()));
    }

    let price_tick = round_normal(price, 2);
    let size_rounded = round_down(size, 2);

    let (maker_amount, taker_amount) = if side == SIDE_BUY {
        let taker_natural = size_rounded;
        let maker_natural = taker_natural * price_tick;
        (
            (maker_natural * scale).floor(),
            (taker_natural * scale).floor(),
        )
    } else {
        let maker_natural = size_rounded;
        let taker_natural = maker_natural * price_tick;
        (
            (maker_natural * scale).floor(),
            (taker_natural * scale).floor(),
        )
    };

    Ok((decimal_to_u64(maker_amount)?, decimal_to_u64(taker_amount)?))
}

/// Rounds a Decimal down (floor) to the given number of decimal places.
fn round_down(value: Decimal, dp: u32) -> Decimal {
    let factor = Decimal::from(10u64.pow(dp));
    (value * factor).floor() / factor
}

/// Rounds a Decimal to nearest (half-up) to the given number of decimal places.
fn round_normal(value: Decimal, dp: u32) -> Decimal {
    let factor = Decimal::from(10u64.pow(dp));
    (value * factor).round() / factor
}

fn decimal_to_u64(d: Decimal) -> Result<u64, Eip712Error> {
    d.to_string()
        .split('.')
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| Eip712Error::AmountError(format!("cannot convert {d} to u64")))
}

// =============================================================================
// Salt generation
// =============================================================================

/// Generates a random salt for order uniqueness.
///
/// Matches the venue SDK convention: `round(timestamp * random())`,
/// a small number that fits in a JSON integer.
pub fn generate_salt() -> u64 {
    use rand::Rng;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let random: f64 = rand::thread_rng().gen();
    ((now as f64) * random) as u64
}

// =============================================================================
// ABI encoding helpers
// =============================================================================

/// Parses a hex address string (with or without 0x prefix) to 20 bytes.
pub fn parse_address(addr: &str) -> Result<[u8; 20], Eip712Error> {
    let hex_str = addr.strip_prefix("0x").unwrap_or(addr);
    let bytes = hex::decode(hex_str)
        .map_err(|e| Eip712Error::InvalidAddress(format!("invalid hex: {e}")))?;
    if bytes.len() != 20 {
        return Err(Eip712Error::InvalidAddress(format!(
            "address must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn abi_encode_address(addr: &[u8; 20]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..32].copy_from_slice(addr);
    out
}

fn abi_encode_u256_from_u64(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..32].copy_from_slice(&value.to_be_bytes());
    out
}

/// Converts a token ID string to a 32-byte big-endian uint256.
///
/// Token IDs can be up to 2^256 - 1, so the base-10 parse is manual.
fn token_id_to_u256(token_id: &str) -> [u8; 32] {
    let mut result = [0u8; 32];

    let mut digits: Vec<u8> = token_id
        .bytes()
        .filter_map(|b| if b.is_ascii_digit() { Some(b - b'0') } else { None })
        .collect();

    if digits.is_empty() {
        return result;
    }

    // Repeated division by 256 converts decimal digits to bytes.
    let mut byte_vec = Vec::new();
    while !(digits.is_empty() || digits.len() == 1 && digits[0] == 0) {
        let mut remainder = 0u16;
        let mut new_digits = Vec::new();
        for &digit in &digits {
            let current = remainder * 10 + digit as u16;
            let quotient = current / 256;
            remainder = current % 256;
            if !new_digits.is_empty() || quotient > 0 {
                new_digits.push(quotient as u8);
            }
        }
        byte_vec.push(remainder as u8);
        digits = new_digits;
    }

    // byte_vec is little-endian; reverse into result right-aligned.
    let start = 32 - byte_vec.len().min(32);
    for (i, &b) in byte_vec.iter().rev().enumerate() {
        if start + i < 32 {
            result[start + i] = b;
        }
    }

    result
}

/// Parameters for building an EIP-712 order.
pub struct BuildOrderParams<'a> {
    /// The signing wallet; supplies maker (funder), signer, and
    /// signature type.
    pub wallet: &'a Wallet,
    /// Token ID for the conditional token.
    pub token_id: &'a str,
    /// Side: `SIDE_BUY` (0) or `SIDE_SELL` (1).
    pub side: u8,
    /// Price per share as a Decimal (0..1).
    pub price: Decimal,
    /// Number of shares.
    pub size: Decimal,
    /// Order expiration in seconds since epoch (0 = none).
    pub expiration_secs: u64,
    /// Nonce for order uniqueness.
    pub nonce: u64,
    /// Fee rate in basis points.
    pub fee_rate_bps: u16,
}

/// Creates a new order with common defaults filled in.
pub fn build_order(params: &BuildOrderParams<'_>) -> Result<Eip712Order, Eip712Error> {
    let maker = parse_address(params.wallet.funder())?;
    let signer = parse_address(params.wallet.address())?;
    let (maker_amount, taker_amount) = calculate_amounts(params.side, params.price, params.size)?;

    Ok(Eip712Order {
        salt: generate_salt(),
        maker,
        signer,
        taker: ZERO_ADDRESS,
        token_id: params.token_id.to_string(),
        maker_amount,
        taker_amount,
        expiration: params.expiration_secs,
        nonce: params.nonce,
        fee_rate_bps: params.fee_rate_bps,
        side: params.side,
        signature_type: params.wallet.signature_kind().wire_value(),
    })
}

// =============================================================================
// Tests
// =============================================================================
