//! Secure hash codec for VPC-style gateway parameters.
//!
//! Both directions use the same canonical form: drop the hash fields and any
//! value that is blank after trimming, then walk the remaining keys in byte
//! order. MD5 hashes `secret ++ values`; SHA256 is an HMAC over `k=v&k=v`
//! keyed with the hex-decoded secret.

use crate::payments::error::GatewayError;
use crate::payments::utils::secure_eq;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

pub const SECURE_HASH_FIELD: &str = "vpc_SecureHash";
pub const SECURE_HASH_TYPE_FIELD: &str = "vpc_SecureHashType";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecureHashAlgorithm {
    Md5,
    Sha256,
}

impl SecureHashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecureHashAlgorithm::Md5 => "MD5",
            SecureHashAlgorithm::Sha256 => "SHA256",
        }
    }
}

impl std::fmt::Display for SecureHashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SecureHashAlgorithm {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "MD5" => Ok(SecureHashAlgorithm::Md5),
            "SHA256" | "SHA-256" | "HMACSHA256" => Ok(SecureHashAlgorithm::Sha256),
            other => Err(GatewayError::Configuration {
                message: format!("unsupported secure hash algorithm: {}", other),
            }),
        }
    }
}

fn is_signed_field(key: &str, value: &str) -> bool {
    key != SECURE_HASH_FIELD && key != SECURE_HASH_TYPE_FIELD && !value.trim().is_empty()
}

/// The exact string that gets hashed (without the secret for MD5).
pub fn canonical_string(params: &BTreeMap<String, String>, algorithm: SecureHashAlgorithm) -> String {
    let included = params.iter().filter(|(k, v)| is_signed_field(k, v));
    match algorithm {
        SecureHashAlgorithm::Md5 => included.map(|(_, v)| v.as_str()).collect(),
        SecureHashAlgorithm::Sha256 => included
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&"),
    }
}

/// Hex secrets are decoded to raw key bytes. Decoding walks the trimmed
/// secret two characters at a time and stops at the first pair that is not
/// hex, so a malformed secret keys the HMAC with its longest valid prefix and
/// a trailing odd character is dropped. Startup config validation warns when
/// that happens.
pub fn decode_secret(secret: &str) -> Vec<u8> {
    let digits = secret.trim().as_bytes();
    let mut key = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks_exact(2) {
        let mut byte = [0u8; 1];
        if hex::decode_to_slice(pair, &mut byte).is_err() {
            break;
        }
        key.push(byte[0]);
    }
    if key.len() * 2 != digits.len() {
        debug!(
            decoded_bytes = key.len(),
            "secure secret is not clean hex, using its valid prefix"
        );
    }
    key
}

pub fn secret_is_hex(secret: &str) -> bool {
    let trimmed = secret.trim();
    !trimmed.is_empty() && hex::decode(trimmed).is_ok()
}

/// Signature over `params` as uppercase hex.
pub fn sign(params: &BTreeMap<String, String>, secret: &str, algorithm: SecureHashAlgorithm) -> String {
    let canonical = canonical_string(params, algorithm);
    match algorithm {
        SecureHashAlgorithm::Md5 => {
            let mut hasher = Md5::new();
            hasher.update(secret.as_bytes());
            hasher.update(canonical.as_bytes());
            hex::encode_upper(hasher.finalize())
        }
        SecureHashAlgorithm::Sha256 => {
            type HmacSha256 = Hmac<Sha256>;
            let key = decode_secret(secret);
            let mut mac = match HmacSha256::new_from_slice(&key) {
                Ok(v) => v,
                Err(_) => return String::new(),
            };
            mac.update(canonical.as_bytes());
            hex::encode_upper(mac.finalize().into_bytes())
        }
    }
}

/// Recomputes the signature and compares it, byte for byte, with the
/// `vpc_SecureHash` value carried in `params`. Missing signature is simply
/// `false`.
pub fn verify(params: &BTreeMap<String, String>, secret: &str, algorithm: SecureHashAlgorithm) -> bool {
    let supplied = match params.get(SECURE_HASH_FIELD) {
        Some(v) if !v.trim().is_empty() => v,
        _ => return false,
    };
    let expected = sign(params, secret, algorithm);
    !expected.is_empty() && secure_eq(expected.as_bytes(), supplied.as_bytes())
}

/// Adds the signature and algorithm tag to `params` in place.
pub fn attach_signature(
    params: &mut BTreeMap<String, String>,
    secret: &str,
    algorithm: SecureHashAlgorithm,
) {
    let signature = sign(params, secret, algorithm);
    params.insert(SECURE_HASH_FIELD.to_string(), signature);
    params.insert(
        SECURE_HASH_TYPE_FIELD.to_string(),
        algorithm.as_str().to_string(),
    );
}
