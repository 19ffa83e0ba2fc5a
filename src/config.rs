//! Gateway tunables: page-size limits and cursor store lifetime, with the
//! defaults the caller falls back to when it hasn't read its own config.

use std::time::Duration;

/// Tunables for the gateway.
///
/// Values are read from the environment by the caller (out of scope for this
/// crate); this struct just carries the already-parsed result.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Page size used when the caller doesn't specify `limit`.
    pub default_limit: u64,

    /// Hard ceiling on `limit`, and on the over-fetch expansion the cursor
    /// engine performs to compensate for `seen_ids` filtering.
    pub max_limit: u64,

    /// A cursor that base64-encodes to more than this many bytes is spilled
    /// to the cursor store instead of being returned inline.
    pub cursor_max_inline_bytes: usize,

    /// How long a spilled cursor lives in the store before it expires.
    pub cursor_ttl: Duration,

    /// How often the store's background sweeper scans for expired cursors.
    pub cursor_sweep_interval: Duration,
}

/// The default page size.
pub const DEFAULT_LIMIT: u64 = 10;

/// The default maximum page size.
pub const DEFAULT_MAX_LIMIT: u64 = 10_000;

/// The default cursor inline-size ceiling.
pub const DEFAULT_CURSOR_MAX_INLINE_BYTES: usize = 2_048;

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
            cursor_max_inline_bytes: DEFAULT_CURSOR_MAX_INLINE_BYTES,
            cursor_ttl: Duration::from_secs(60 * 60),
            cursor_sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl GatewayConfig {
    /// Clamps a caller-provided limit into `[1, max_limit]`, defaulting to
    /// `default_limit` when absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_granule_gateway::GatewayConfig;
    /// let config = GatewayConfig::default();
    /// assert_eq!(config.clamp_limit(None), 10);
    /// assert_eq!(config.clamp_limit(Some(0)), 1);
    /// assert_eq!(config.clamp_limit(Some(1_000_000)), config.max_limit);
    /// ```
    pub fn clamp_limit(&self, limit: Option<u64>) -> u64 {
        limit
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::GatewayConfig;

    #[test]
    fn clamp_limit_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.clamp_limit(None), config.default_limit);
    }

    #[test]
    fn clamp_limit_zero_floors_to_one() {
        let config = GatewayConfig::default();
        assert_eq!(config.clamp_limit(Some(0)), 1);
    }

    #[test]
    fn clamp_limit_caps_at_max() {
        let config = GatewayConfig::default();
        assert_eq!(config.clamp_limit(Some(u64::MAX)), config.max_limit);
    }
}
