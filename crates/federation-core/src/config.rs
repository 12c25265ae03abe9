//! Tuning configuration, following `spark-core::configuration`'s split
//! between a typed struct with documented defaults and an optional
//! `serde`-deserializable source form.

use crate::error::{ErrorCode, FederationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A statically configured voter identity (spec §3, "Vote / Voter"). The set
/// of voters is a cluster constant, identical on every node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterConfig {
    pub id: String,
    pub kind: VoterKind,
    pub connection_string: String,
    pub ring_name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoterKind {
    SeedNode,
    SqlServer,
    WindowsAzure,
}

/// Every tuning constant named in spec §6, with the defaults used across the
/// end-to-end scenarios in spec §8.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub neighborhood_size: u32,
    #[serde(with = "duration_millis")]
    pub message_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub routing_retry_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub join_lock_duration: Duration,
    #[serde(with = "duration_millis")]
    pub ping_interval: Duration,
    #[serde(with = "duration_millis")]
    pub unknown_node_probe_timeout: Duration,

    #[serde(with = "duration_millis")]
    pub broadcast_context_keep_duration: Duration,
    pub max_neighborhood_headers: u32,
    pub max_update_target: u32,
    #[serde(with = "duration_millis")]
    pub update_interval: Duration,
    pub broadcast_step_count_max: u32,

    pub routing_table_capacity: usize,
    #[serde(with = "duration_millis")]
    pub routing_table_compact_interval: Duration,

    #[serde(with = "duration_millis")]
    pub voter_store_retry_interval: Duration,
    #[serde(with = "duration_millis")]
    pub voter_store_bootstrap_wait_interval: Duration,
    #[serde(with = "duration_millis")]
    pub voter_store_liveness_check_interval: Duration,

    #[serde(with = "duration_millis")]
    pub global_time_uncertainty_max_increase: Duration,
    #[serde(with = "duration_millis")]
    pub global_time_uncertainty_max_decrease: Duration,
    pub global_time_clock_drift_ratio: f64,
    #[serde(with = "duration_millis")]
    pub global_time_new_epoch_wait_interval: Duration,
    #[serde(with = "duration_millis")]
    pub global_time_trace_interval: Duration,
    #[serde(with = "duration_millis")]
    pub global_time_uncertainty_interval_upper_bound: Duration,

    /// Token-version recovery threshold (spec §4.1): a received version that
    /// trails local by at least this much signals a recovery, not a normal
    /// increment, and must never be merged.
    pub recovery_increment: u64,

    pub votes: Vec<VoterConfig>,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            neighborhood_size: 2,
            message_timeout: Duration::from_secs(30),
            routing_retry_timeout: Duration::from_secs(5),
            join_lock_duration: Duration::from_secs(30),
            ping_interval: Duration::from_secs(5),
            unknown_node_probe_timeout: Duration::from_secs(10),

            broadcast_context_keep_duration: Duration::from_secs(300),
            max_neighborhood_headers: 32,
            max_update_target: 8,
            update_interval: Duration::from_secs(30),
            broadcast_step_count_max: 3,

            routing_table_capacity: 4096,
            routing_table_compact_interval: Duration::from_secs(60),

            voter_store_retry_interval: Duration::from_secs(2),
            voter_store_bootstrap_wait_interval: Duration::from_secs(10),
            voter_store_liveness_check_interval: Duration::from_secs(5),

            global_time_uncertainty_max_increase: Duration::from_millis(500),
            global_time_uncertainty_max_decrease: Duration::from_millis(100),
            global_time_clock_drift_ratio: 0.0001,
            global_time_new_epoch_wait_interval: Duration::from_secs(60),
            global_time_trace_interval: Duration::from_secs(30),
            global_time_uncertainty_interval_upper_bound: Duration::from_secs(5),

            recovery_increment: 1u64 << 32,

            votes: Vec::new(),
        }
    }
}

impl FederationConfig {
    /// Rejects combinations that can never produce a correct ring, the way
    /// `spark-core::configuration` validates at load time rather than
    /// letting an inconsistent value surface as a confusing runtime failure
    /// three layers down.
    pub fn validate(&self) -> Result<(), FederationError> {
        if self.neighborhood_size == 0 {
            return Err(FederationError::new(
                ErrorCode::InvalidConfiguration,
                "neighborhood_size must be at least 1",
            ));
        }
        if self.votes.is_empty() {
            return Err(FederationError::new(
                ErrorCode::InvalidConfiguration,
                "at least one voter must be configured",
            ));
        }
        if self.recovery_increment == 0 {
            return Err(FederationError::new(
                ErrorCode::InvalidConfiguration,
                "recovery_increment must be nonzero or merge-safety never rejects a reissued token",
            ));
        }
        if self.routing_table_capacity == 0 {
            return Err(FederationError::new(
                ErrorCode::InvalidConfiguration,
                "routing_table_capacity must be at least 1",
            ));
        }
        Ok(())
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(input: &str) -> Result<Self, FederationError> {
        let config: Self = toml::from_str(input).map_err(|e| {
            FederationError::new(ErrorCode::InvalidConfiguration, e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let mut config = FederationConfig::default();
        config.votes.push(VoterConfig {
            id: "seed-1".into(),
            kind: VoterKind::SeedNode,
            connection_string: "10.0.0.1:9000".into(),
            ring_name: None,
        });
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_neighborhood_size() {
        let mut config = FederationConfig::default();
        config.neighborhood_size = 0;
        assert_eq!(
            config.validate().unwrap_err().code(),
            ErrorCode::InvalidConfiguration
        );
    }

    #[test]
    fn rejects_empty_voter_list() {
        let config = FederationConfig::default();
        assert_eq!(
            config.validate().unwrap_err().code(),
            ErrorCode::InvalidConfiguration
        );
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn parses_toml_round_trip() {
        let toml_str = r#"
            neighborhood_size = 3
            recovery_increment = 4294967296

            [[votes]]
            id = "seed-1"
            kind = "SeedNode"
            connection_string = "10.0.0.1:9000"
        "#;
        let config = FederationConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.neighborhood_size, 3);
        assert_eq!(config.votes.len(), 1);
    }
}
