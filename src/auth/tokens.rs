//! Token records and their freshness

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Tokens are renewed this long before they actually expire
pub const REFRESH_MARGIN: Duration = Duration::minutes(5);

/// Token endpoint response body
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[allow(dead_code)]
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
}

/// Persisted access token
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
    pub refresh_token: Option<String>,
}

impl TokenRecord {
    /// Stamp a fresh response; expiry is fixed relative to `issued_at` here and never again.
    pub fn issued(response: TokenResponse, issued_at: DateTime<Utc>) -> Result<Self> {
        if response.expires_in < 0 {
            return Err(Error::Decoding(format!(
                "negative expires_in: {}",
                response.expires_in
            )));
        }
        let expiry = Duration::try_seconds(response.expires_in)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or_else(|| {
                Error::Decoding(format!("expires_in out of range: {}", response.expires_in))
            })?;

        Ok(Self {
            access_token: response.access_token,
            expiry,
            refresh_token: response.refresh_token,
        })
    }

    pub fn refresh_threshold(&self) -> DateTime<Utc> {
        self.expiry
            .checked_sub_signed(REFRESH_MARGIN)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        if now < self.refresh_threshold() {
            TokenState::Valid
        } else if now < self.expiry {
            TokenState::NearExpiry
        } else {
            TokenState::Expired
        }
    }
}

/// Where a cached token sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    Valid,
    NearExpiry,
    Expired,
}

impl std::fmt::Display for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoToken => "none",
            Self::Valid => "valid",
            Self::NearExpiry => "near expiry",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Expiry is stored as 8 little-endian bytes of f64 seconds since the epoch.
pub fn encode_expiry(expiry: DateTime<Utc>) -> [u8; 8] {
    let secs = expiry.timestamp_micros() as f64 / 1_000_000.0;
    secs.to_le_bytes()
}

pub fn decode_expiry(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    let secs = f64::from_le_bytes(raw);
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round() as i64;
    Utc.timestamp_micros(micros).single()
}
