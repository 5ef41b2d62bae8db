//! Configuration of the key ceremony and decryption coordinators.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::time::Duration;

const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_PLAINTEXT: u64 = 1_000_000;
/// Upper bound on [`DecryptionConfig::max_plaintext`]; the lookup table is built eagerly.
pub const MAX_PLAINTEXT_LIMIT: u64 = 1 << 24;

fn default_rpc_timeout_ms() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}

fn default_max_plaintext() -> u64 {
    DEFAULT_MAX_PLAINTEXT
}

fn default_created_by() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned()
}

/// Errors produced when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML source cannot be parsed.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// The number of guardians is zero.
    #[error("number of guardians must be positive")]
    NoGuardians,
    /// Quorum is outside `1..=guardian_count`.
    #[error("quorum {quorum} must be in 1..={guardian_count}")]
    InvalidQuorum {
        /// Configured quorum.
        quorum: usize,
        /// Configured number of guardians.
        guardian_count: usize,
    },
    /// The number of available guardians is outside `quorum..=guardian_count`.
    #[error("number of available guardians {navailable} must be in {quorum}..={guardian_count}")]
    InvalidAvailable {
        /// Configured number of available guardians.
        navailable: usize,
        /// Quorum of the key ceremony.
        quorum: usize,
        /// Number of guardians in the key ceremony.
        guardian_count: usize,
    },
    /// The RPC timeout is zero.
    #[error("RPC timeout must be positive")]
    ZeroTimeout,
    /// The largest decryptable plaintext exceeds [`MAX_PLAINTEXT_LIMIT`].
    #[error("max plaintext {0} exceeds the limit of {limit}", limit = MAX_PLAINTEXT_LIMIT)]
    PlaintextTooLarge(u64),
}

/// Rule deciding whether a new guardian id collides with an already registered one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdCollisionRule {
    /// Ids collide if one is a case-insensitive substring of the other
    /// (e.g., `g1` and `G10`).
    #[default]
    CaseInsensitiveSubstring,
    /// Ids collide if they are equal ignoring case.
    CaseInsensitiveEqual,
    /// Ids collide only if they are byte-for-byte equal.
    Exact,
}

impl IdCollisionRule {
    /// Checks whether `new_id` collides with `existing_id`.
    pub fn collides(self, new_id: &str, existing_id: &str) -> bool {
        match self {
            Self::Exact => new_id == existing_id,
            Self::CaseInsensitiveEqual => new_id.to_lowercase() == existing_id.to_lowercase(),
            Self::CaseInsensitiveSubstring => {
                let new_id = new_id.to_lowercase();
                let existing_id = existing_id.to_lowercase();
                new_id.contains(&existing_id) || existing_id.contains(&new_id)
            }
        }
    }
}

/// Configuration of the key ceremony coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CeremonyConfig {
    /// Total number of guardians `N`.
    pub guardian_count: usize,
    /// Minimum number of guardians required for decryption.
    pub quorum: usize,
    /// Timeout for a single guardian call, in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Rule for rejecting similar guardian ids.
    #[serde(default)]
    pub id_collision_rule: IdCollisionRule,
    /// Value of the `CreatedBy` metadata entry in published records.
    #[serde(default = "default_created_by")]
    pub created_by: String,
    /// Value of the `CreatedFromDir` metadata entry in published records.
    #[serde(default)]
    pub created_from: Option<String>,
}

impl CeremonyConfig {
    /// Creates a configuration with default timeouts and id collision rule.
    ///
    /// # Errors
    ///
    /// Returns an error if `quorum` is not in `1..=guardian_count`.
    pub fn new(guardian_count: usize, quorum: usize) -> Result<Self, ConfigError> {
        let config = Self {
            guardian_count,
            quorum,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            id_collision_rule: IdCollisionRule::default(),
            created_by: default_created_by(),
            created_from: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be parsed or is invalid.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns an error if any invariant is violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.guardian_count == 0 {
            return Err(ConfigError::NoGuardians);
        }
        if self.quorum == 0 || self.quorum > self.guardian_count {
            return Err(ConfigError::InvalidQuorum {
                quorum: self.quorum,
                guardian_count: self.guardian_count,
            });
        }
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Sets the RPC timeout.
    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    /// Sets the id collision rule.
    #[must_use]
    pub fn with_id_collision_rule(mut self, rule: IdCollisionRule) -> Self {
        self.id_collision_rule = rule;
        self
    }

    /// Returns the RPC timeout.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Configuration of the decryption coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecryptionConfig {
    /// Number of guardians expected to take part in decryption.
    pub navailable: usize,
    /// Timeout for a single guardian call, in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Rule for rejecting duplicate guardian registrations. Registered ids must match
    /// key ceremony records byte-for-byte, so the default is [`IdCollisionRule::Exact`];
    /// a looser rule rejects guardians whose ceremony ids differ only in case.
    #[serde(default = "DecryptionConfig::default_collision_rule")]
    pub id_collision_rule: IdCollisionRule,
    /// Largest plaintext value recovered by the discrete log lookup.
    #[serde(default = "default_max_plaintext")]
    pub max_plaintext: u64,
    /// Whether to decrypt spoiled ballots in addition to the tally.
    #[serde(default)]
    pub decrypt_spoiled: bool,
    /// Value of the `CreatedBy` metadata entry in published records.
    #[serde(default = "default_created_by")]
    pub created_by: String,
    /// Value of the `CreatedFromDir` metadata entry in published records.
    #[serde(default)]
    pub created_from: Option<String>,
}

impl DecryptionConfig {
    fn default_collision_rule() -> IdCollisionRule {
        IdCollisionRule::Exact
    }

    /// Creates a configuration expecting `navailable` guardians.
    pub fn new(navailable: usize) -> Self {
        Self {
            navailable,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            id_collision_rule: Self::default_collision_rule(),
            max_plaintext: DEFAULT_MAX_PLAINTEXT,
            decrypt_spoiled: false,
            created_by: default_created_by(),
            created_from: None,
        }
    }

    /// Parses configuration from TOML. Validation against the key ceremony parameters
    /// happens in [`Self::validate()`].
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be parsed.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Checks `quorum <= navailable <= guardian_count` and other invariants.
    ///
    /// # Errors
    ///
    /// Returns an error if any invariant is violated.
    pub fn validate(&self, guardian_count: usize, quorum: usize) -> Result<(), ConfigError> {
        if self.navailable < quorum || self.navailable > guardian_count {
            return Err(ConfigError::InvalidAvailable {
                navailable: self.navailable,
                quorum,
                guardian_count,
            });
        }
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_plaintext > MAX_PLAINTEXT_LIMIT {
            return Err(ConfigError::PlaintextTooLarge(self.max_plaintext));
        }
        Ok(())
    }

    /// Sets the RPC timeout.
    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    /// Enables or disables decryption of spoiled ballots.
    #[must_use]
    pub fn with_spoiled(mut self, decrypt_spoiled: bool) -> Self {
        self.decrypt_spoiled = decrypt_spoiled;
        self
    }

    /// Returns the RPC timeout.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn id_collision_rules() {
        let rule = IdCollisionRule::CaseInsensitiveSubstring;
        assert!(rule.collides("g1", "G10"));
        assert!(rule.collides("guardian", "GUARD"));
        assert!(!rule.collides("g1", "g2"));

        let rule = IdCollisionRule::CaseInsensitiveEqual;
        assert!(rule.collides("g1", "G1"));
        assert!(!rule.collides("g1", "g10"));

        assert!(!IdCollisionRule::Exact.collides("g1", "G1"));
    }

    #[test]
    fn ceremony_config_from_toml() {
        let config = CeremonyConfig::from_toml_str(
            r#"
            guardian_count = 5
            quorum = 3
            rpc_timeout_ms = 2500
            id_collision_rule = "case_insensitive_equal"
            "#,
        )
        .unwrap();
        assert_eq!(config.guardian_count, 5);
        assert_eq!(config.rpc_timeout(), Duration::from_millis(2_500));
        assert_eq!(config.id_collision_rule, IdCollisionRule::CaseInsensitiveEqual);
        assert!(config.created_by.starts_with("guardian-ceremony/"));

        let err = CeremonyConfig::from_toml_str("guardian_count = 3\nquorum = 4").unwrap_err();
        assert_matches!(err, ConfigError::InvalidQuorum { quorum: 4, guardian_count: 3 });
        let err = CeremonyConfig::from_toml_str("guardian_count = 3\nquorm = 2").unwrap_err();
        assert_matches!(err, ConfigError::Parse(_));
    }

    #[test]
    fn decryption_config_bounds() {
        let config =
            DecryptionConfig::from_toml_str("navailable = 3\ndecrypt_spoiled = true").unwrap();
        assert!(config.decrypt_spoiled);
        assert_eq!(config.id_collision_rule, IdCollisionRule::Exact);
        config.validate(5, 3).unwrap();

        let err = DecryptionConfig::new(2).validate(5, 3).unwrap_err();
        assert_matches!(err, ConfigError::InvalidAvailable { navailable: 2, .. });
        let err = DecryptionConfig::new(6).validate(5, 3).unwrap_err();
        assert_matches!(err, ConfigError::InvalidAvailable { navailable: 6, .. });

        let source = format!("navailable = 3\nmax_plaintext = {MAX_PLAINTEXT_LIMIT}");
        DecryptionConfig::from_toml_str(&source).unwrap().validate(5, 3).unwrap();
        let source = format!("navailable = 3\nmax_plaintext = {}", i64::MAX);
        let err = DecryptionConfig::from_toml_str(&source)
            .unwrap()
            .validate(5, 3)
            .unwrap_err();
        assert_matches!(err, ConfigError::PlaintextTooLarge(value) if value == i64::MAX as u64);
    }
}
