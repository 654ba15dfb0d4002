//! Time-based one-time passwords (RFC 6238, HMAC-SHA1)
//!
//! Employees sign in with a code from an authenticator app instead of a
//! password. Secrets are stored base32-encoded, the format the apps import.

use base32::Alphabet;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;
use thiserror::Error;

use crate::config::TotpConfig;

type HmacSha1 = Hmac<Sha1>;

const BASE32: Alphabet = Alphabet::RFC4648 { padding: false };

/// Secret length in bytes (160 bits, as recommended for SHA1)
const SECRET_BYTES: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TotpError {
    #[error("TOTP secret is not valid base32")]
    InvalidSecret,
    #[error("TOTP digits must be between 6 and 8")]
    InvalidDigits,
}

/// A keyed TOTP generator
#[derive(Clone)]
pub struct Totp {
    mac: HmacSha1,
    period: u64,
    digits: u32,
    skew: u8,
}

impl Totp {
    pub fn new(secret: &[u8], period: u64, digits: u32, skew: u8) -> Result<Self, TotpError> {
        if !(6..=8).contains(&digits) {
            return Err(TotpError::InvalidDigits);
        }
        let mac = HmacSha1::new_from_slice(secret).map_err(|_| TotpError::InvalidSecret)?;
        Ok(Self {
            mac,
            period: period.max(1),
            digits,
            skew,
        })
    }

    /// Build from a base32 secret using configured parameters
    pub fn from_base32(secret: &str, config: &TotpConfig) -> Result<Self, TotpError> {
        let bytes = decode_secret(secret)?;
        Self::new(&bytes, config.period, config.digits, config.skew)
    }

    /// Code for the time step containing `unix_secs`
    pub fn code_at(&self, unix_secs: u64) -> String {
        self.code_for_counter(unix_secs / self.period)
    }

    /// Check a code against the current step and `skew` steps either side
    pub fn verify_at(&self, code: &str, unix_secs: u64) -> bool {
        let code = code.trim();
        if code.len() != self.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }

        let counter = unix_secs / self.period;
        let skew = u64::from(self.skew);
        (counter.saturating_sub(skew)..=counter.saturating_add(skew))
            .any(|c| self.code_for_counter(c) == code)
    }

    pub fn verify(&self, code: &str) -> bool {
        self.verify_at(code, now_unix())
    }

    fn code_for_counter(&self, counter: u64) -> String {
        let mut mac = self.mac.clone();
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        // Dynamic truncation (RFC 4226 section 5.3)
        let offset = usize::from(digest[digest.len() - 1] & 0x0f);
        let binary = u32::from_be_bytes([
            digest[offset] & 0x7f,
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]);

        let code = binary % 10u32.pow(self.digits);
        format!("{:0width$}", code, width = self.digits as usize)
    }
}

/// Generate a fresh random base32 secret
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill(&mut bytes[..]);
    base32::encode(BASE32, &bytes)
}

/// Decode a base32 secret, tolerating lower case, spaces and padding
pub fn decode_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.is_empty() {
        return Err(TotpError::InvalidSecret);
    }
    base32::decode(BASE32, &normalized).ok_or(TotpError::InvalidSecret)
}

/// `otpauth://` URI for enrolling a secret in an authenticator app
pub fn provisioning_uri(secret: &str, account_name: &str, config: &TotpConfig) -> String {
    let issuer = urlencoding::encode(&config.issuer);
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        issuer,
        urlencoding::encode(account_name),
        secret,
        issuer,
        config.digits,
        config.period
    )
}

fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
