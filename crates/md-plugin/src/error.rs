use std::fmt;

/// Hand-written error enum, matching the provider-error convention used
/// elsewhere in this workspace: no `thiserror`, a `Display` impl per
/// variant, and a `retryable()` classification the backfill and
/// subscription loops use to decide whether to back off and retry or give
/// up on an asset.
#[derive(Debug)]
pub enum PluginError {
    Auth(String),
    Network(String),
    RateLimited,
    FeatureNotSupported(&'static str),
    InvalidSymbol(String),
    Other(anyhow::Error),
}

impl PluginError {
    pub fn retryable(&self) -> bool {
        matches!(self, PluginError::Network(_) | PluginError::RateLimited)
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginError::Auth(msg) => write!(f, "plugin auth failed: {msg}"),
            PluginError::Network(msg) => write!(f, "plugin network error: {msg}"),
            PluginError::RateLimited => write!(f, "plugin rate limited"),
            PluginError::FeatureNotSupported(feature) => write!(f, "plugin does not support feature: {feature}"),
            PluginError::InvalidSymbol(symbol) => write!(f, "invalid symbol: {symbol}"),
            PluginError::Other(err) => write!(f, "plugin error: {err}"),
        }
    }
}

impl std::error::Error for PluginError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PluginError::Other(err) => err.source(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PluginError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            PluginError::Network(err.to_string())
        } else if err.status().map(|s| s.as_u16() == 429).unwrap_or(false) {
            PluginError::RateLimited
        } else if err.status().map(|s| s.as_u16() == 401 || s.as_u16() == 403).unwrap_or(false) {
            PluginError::Auth(err.to_string())
        } else {
            PluginError::Other(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_and_rate_limit_are_retryable() {
        assert!(PluginError::Network("timeout".into()).retryable());
        assert!(PluginError::RateLimited.retryable());
        assert!(!PluginError::Auth("bad key".into()).retryable());
        assert!(!PluginError::FeatureNotSupported("trading_api").retryable());
    }
}
