//! Platform integrations.
//!
//! Defines the `MarketAdapter` trait and provides implementations for:
//! - Kalshi — events-first discovery via the Elections API
//! - Polymarket — Gamma API discovery, bracket grouping by question id
//! - PredictIt — public read-only market data API
//!
//! Adapters are stateless with respect to the rest of the system: they
//! fetch, normalize, and return. All failures are reported as values —
//! one platform's failure never prevents another's success.

pub mod kalshi;
pub mod polymarket;
pub mod predictit;

use async_trait::async_trait;

use crate::types::Market;

/// Typed adapter failure. The scanner treats these as data: timeouts and
/// rate limits retry on the next scheduled cycle, auth failures mark the
/// adapter degraded, malformed data drops only the offending records.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("{platform}: request timed out")]
    Timeout { platform: String },

    #[error("{platform}: authentication failed")]
    AuthFailure { platform: String },

    #[error("{platform}: rate limited")]
    RateLimited { platform: String },

    #[error("{platform}: malformed data: {message}")]
    MalformedData { platform: String, message: String },

    #[error("{platform}: unreachable: {message}")]
    Unreachable { platform: String, message: String },
}

impl AdapterError {
    pub fn platform(&self) -> &str {
        match self {
            AdapterError::Timeout { platform }
            | AdapterError::AuthFailure { platform }
            | AdapterError::RateLimited { platform }
            | AdapterError::MalformedData { platform, .. }
            | AdapterError::Unreachable { platform, .. } => platform,
        }
    }

    /// Whether the next scheduled cycle should simply try again.
    /// Auth failures need external credential refresh first.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AdapterError::AuthFailure { .. })
    }

    /// Classify a transport error from `reqwest`.
    pub fn from_reqwest(platform: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Timeout {
                platform: platform.to_string(),
            }
        } else if err.is_decode() {
            AdapterError::MalformedData {
                platform: platform.to_string(),
                message: err.to_string(),
            }
        } else {
            AdapterError::Unreachable {
                platform: platform.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(platform: &str, status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => AdapterError::AuthFailure {
                platform: platform.to_string(),
            },
            429 => AdapterError::RateLimited {
                platform: platform.to_string(),
            },
            _ => AdapterError::Unreachable {
                platform: platform.to_string(),
                message: format!("HTTP {status}"),
            },
        }
    }
}

/// Abstraction over prediction market platforms.
///
/// Implementors fetch raw quotes and map them onto the canonical
/// `Market`/`Outcome`/`Quote` model. Authentication and signing happen
/// beneath this boundary.
#[async_trait]
pub trait MarketAdapter: Send + Sync {
    /// Fetch all active markets from this platform.
    async fn fetch_markets(&self) -> Result<Vec<Market>, AdapterError>;

    /// Platform name for logging and identification.
    fn name(&self) -> &str;
}

/// Normalize a platform price to the [0,1] scale. Cent-denominated
/// prices (Kalshi, PredictIt legacy) come in as 1–100.
pub(crate) fn normalize_price(price: f64) -> Option<f64> {
    if !price.is_finite() {
        return None;
    }
    let p = if price > 1.0 { price / 100.0 } else { price };
    if (0.0..=1.0).contains(&p) {
        Some(p)
    } else {
        None
    }
}
