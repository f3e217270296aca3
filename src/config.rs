//! Pool Configuration
//!
//! Defines the configuration surface consumed when a pool is constructed:
//! the topology integers, chunk and drive geometry, HA striping parameters
//! and the integrity policy. Configurations can be loaded from YAML or JSON
//! and validated before any topology is built.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ec::integrity::VulnerabilityPolicy;
use crate::error::{Error, Result};

/// Default chunk size (4 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default drive capacity (1 MiB)
pub const DEFAULT_DRIVE_CAPACITY: usize = 1024 * 1024;

/// Maximum global parity slots per domain (plain + weighted)
pub const MAX_GLOBAL_PARITY_SLOTS: usize = 2;

/// Largest accepted drive capacity (1 GiB). Rebuilds hold whole drives
/// in memory.
pub const MAX_DRIVE_CAPACITY: usize = 1024 * 1024 * 1024;

// =============================================================================
// Pool Mode
// =============================================================================

/// Striping mode of the pool
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PoolMode {
    /// Stripe across every online data drive
    #[default]
    Normal,
    /// Stripe across a fixed, reduced set of drives
    #[serde(rename = "HA")]
    Ha,
}

impl std::fmt::Display for PoolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolMode::Normal => write!(f, "Normal"),
            PoolMode::Ha => write!(f, "HA"),
        }
    }
}

impl std::str::FromStr for PoolMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(PoolMode::Normal),
            "ha" => Ok(PoolMode::Ha),
            other => Err(Error::Configuration(format!("unknown pool mode '{}'", other))),
        }
    }
}

// =============================================================================
// HA Configuration
// =============================================================================

/// Parameters of the reduced-footprint HA striping mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HaConfig {
    /// Data drives taken from each fault domain
    #[serde(default = "default_ha_drives_per_domain")]
    pub drives_per_domain: usize,

    /// Total drives in one HA stripe
    #[serde(default = "default_ha_stripe_width")]
    pub stripe_width: usize,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            drives_per_domain: default_ha_drives_per_domain(),
            stripe_width: default_ha_stripe_width(),
        }
    }
}

fn default_ha_drives_per_domain() -> usize {
    2
}

fn default_ha_stripe_width() -> usize {
    18
}

// =============================================================================
// Pool Configuration
// =============================================================================

/// Full configuration of a storage pool.
///
/// Every fault domain has the same shape: `data_per_domain` data drives,
/// then `local_parity_per_domain` local parity drives, then
/// `global_parity_per_domain` global parity drives, then
/// `spares_per_domain` hot spares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub total_drives: usize,
    pub domain_count: usize,
    pub drives_per_domain: usize,
    pub data_per_domain: usize,
    pub local_parity_per_domain: usize,
    pub global_parity_per_domain: usize,
    pub spares_per_domain: usize,
    pub local_group_size: usize,

    #[serde(default)]
    pub mode: PoolMode,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_drive_capacity")]
    pub drive_capacity: usize,

    #[serde(default)]
    pub ha: HaConfig,

    #[serde(default)]
    pub vulnerability_policy: VulnerabilityPolicy,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_drive_capacity() -> usize {
    DEFAULT_DRIVE_CAPACITY
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::dbox_484()
    }
}

impl PoolConfig {
    /// 11 domains x 44 drives: 38 data, 3 local parity, 1 global parity, 2 spares.
    pub fn dbox_484() -> Self {
        Self {
            total_drives: 484,
            domain_count: 11,
            drives_per_domain: 44,
            data_per_domain: 38,
            local_parity_per_domain: 3,
            global_parity_per_domain: 1,
            spares_per_domain: 2,
            local_group_size: 13,
            mode: PoolMode::Normal,
            chunk_size: DEFAULT_CHUNK_SIZE,
            drive_capacity: DEFAULT_DRIVE_CAPACITY,
            ha: HaConfig::default(),
            vulnerability_policy: VulnerabilityPolicy::GroupThreshold,
        }
    }

    /// One domain of 156 drives: 142 data in groups of 14, 10 local parity,
    /// 2 global parity, 2 spares. The last two data drives form a group
    /// with no parity drive.
    pub fn single_domain_156() -> Self {
        Self {
            total_drives: 156,
            domain_count: 1,
            drives_per_domain: 156,
            data_per_domain: 142,
            local_parity_per_domain: 10,
            global_parity_per_domain: 2,
            spares_per_domain: 2,
            local_group_size: 14,
            vulnerability_policy: VulnerabilityPolicy::ParityAware,
            ..Self::dbox_484()
        }
    }

    /// One domain of 146 drives: two groups of 71, 2 local, 2 global parity.
    pub fn dual_group_146() -> Self {
        Self {
            total_drives: 146,
            domain_count: 1,
            drives_per_domain: 146,
            data_per_domain: 142,
            local_parity_per_domain: 2,
            global_parity_per_domain: 2,
            spares_per_domain: 0,
            local_group_size: 71,
            vulnerability_policy: VulnerabilityPolicy::GroupThreshold,
            ..Self::dbox_484()
        }
    }

    /// Four domains of 39 drives: 35 data, 3 local parity, 1 global parity.
    pub fn quad_domain_156() -> Self {
        Self {
            total_drives: 156,
            domain_count: 4,
            drives_per_domain: 39,
            data_per_domain: 35,
            local_parity_per_domain: 3,
            global_parity_per_domain: 1,
            spares_per_domain: 0,
            local_group_size: 12,
            vulnerability_policy: VulnerabilityPolicy::ParityAware,
            ..Self::dbox_484()
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "dbox-484" => Ok(Self::dbox_484()),
            "single-domain-156" => Ok(Self::single_domain_156()),
            "dual-group-146" => Ok(Self::dual_group_146()),
            "quad-domain-156" => Ok(Self::quad_domain_156()),
            other => Err(Error::Configuration(format!(
                "unknown preset '{}' (expected dbox-484, single-domain-156, dual-group-146 or quad-domain-156)",
                other
            ))),
        }
    }

    /// Load a configuration from a YAML or JSON file (by extension).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            _ => serde_yaml::from_str(&raw)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Number of chunk slots on every drive
    pub fn chunks_per_drive(&self) -> usize {
        self.drive_capacity / self.chunk_size
    }

    /// Number of local groups each domain is cut into
    pub fn groups_per_domain(&self) -> usize {
        self.data_per_domain.div_ceil(self.local_group_size)
    }

    /// Check that the parameters partition the drive ID space exactly.
    pub fn validate(&self) -> Result<()> {
        if self.domain_count == 0 || self.drives_per_domain == 0 {
            return Err(Error::Configuration(
                "domain_count and drives_per_domain must be greater than 0".to_string(),
            ));
        }

        let total = self
            .domain_count
            .checked_mul(self.drives_per_domain)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "{} domains x {} drives overflows",
                    self.domain_count, self.drives_per_domain
                ))
            })?;
        if total != self.total_drives {
            return Err(Error::Configuration(format!(
                "{} domains x {} drives = {} does not match total_drives {}",
                self.domain_count, self.drives_per_domain, total, self.total_drives
            )));
        }

        let per_domain = [
            self.local_parity_per_domain,
            self.global_parity_per_domain,
            self.spares_per_domain,
        ]
        .into_iter()
        .try_fold(self.data_per_domain, usize::checked_add)
        .ok_or_else(|| Error::Configuration("per-domain role counts overflow".to_string()))?;
        if per_domain != self.drives_per_domain {
            return Err(Error::Configuration(format!(
                "per-domain roles sum to {} but drives_per_domain is {}",
                per_domain, self.drives_per_domain
            )));
        }

        if self.data_per_domain == 0 {
            return Err(Error::Configuration(
                "data_per_domain must be greater than 0".to_string(),
            ));
        }

        if self.local_group_size == 0 {
            return Err(Error::Configuration(
                "local_group_size must be greater than 0".to_string(),
            ));
        }

        if self.global_parity_per_domain > MAX_GLOBAL_PARITY_SLOTS {
            return Err(Error::Configuration(format!(
                "at most {} global parity drives per domain are supported, got {}",
                MAX_GLOBAL_PARITY_SLOTS, self.global_parity_per_domain
            )));
        }

        if self.chunk_size == 0 || self.drive_capacity < self.chunk_size {
            return Err(Error::Configuration(format!(
                "chunk_size {} must be non-zero and not exceed drive_capacity {}",
                self.chunk_size, self.drive_capacity
            )));
        }

        if self.drive_capacity > MAX_DRIVE_CAPACITY {
            return Err(Error::Configuration(format!(
                "drive_capacity {} exceeds the {} byte limit",
                self.drive_capacity, MAX_DRIVE_CAPACITY
            )));
        }

        if self.drive_capacity % self.chunk_size != 0 {
            return Err(Error::Configuration(format!(
                "drive_capacity {} is not a multiple of chunk_size {}",
                self.drive_capacity, self.chunk_size
            )));
        }

        if self.ha.drives_per_domain == 0 || self.ha.stripe_width == 0 {
            return Err(Error::Configuration(
                "HA drives_per_domain and stripe_width must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for name in [
            "dbox-484",
            "single-domain-156",
            "dual-group-146",
            "quad-domain-156",
        ] {
            let config = PoolConfig::preset(name).unwrap();
            assert!(config.validate().is_ok(), "preset {} invalid", name);
        }
        assert!(PoolConfig::preset("nope").is_err());
    }

    #[test]
    fn test_default_geometry() {
        let config = PoolConfig::default();
        assert_eq!(config.total_drives, 484);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.drive_capacity, 1024 * 1024);
        assert_eq!(config.chunks_per_drive(), 256);
        assert_eq!(config.groups_per_domain(), 3);
        assert_eq!(config.ha.stripe_width, 18);
    }

    #[test]
    fn test_rejects_uneven_domains() {
        let config = PoolConfig {
            total_drives: 100,
            ..PoolConfig::dbox_484()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_role_mismatch() {
        let config = PoolConfig {
            spares_per_domain: 3,
            ..PoolConfig::dbox_484()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let config = PoolConfig {
            drive_capacity: 4096 * 3 + 1,
            ..PoolConfig::dbox_484()
        };
        assert!(config.validate().is_err());

        let config = PoolConfig {
            local_group_size: 0,
            ..PoolConfig::dbox_484()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_overflowing_counts() {
        let config = PoolConfig {
            domain_count: usize::MAX,
            drives_per_domain: 2,
            ..PoolConfig::dbox_484()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = PoolConfig {
            data_per_domain: usize::MAX,
            spares_per_domain: 2,
            ..PoolConfig::dbox_484()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_oversized_drives() {
        let config = PoolConfig {
            drive_capacity: MAX_DRIVE_CAPACITY * 2,
            ..PoolConfig::dbox_484()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = PoolConfig {
            drive_capacity: MAX_DRIVE_CAPACITY,
            ..PoolConfig::dbox_484()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip_with_defaults() {
        let yaml = r#"
totalDrives: 24
domainCount: 2
drivesPerDomain: 12
dataPerDomain: 8
localParityPerDomain: 2
globalParityPerDomain: 1
sparesPerDomain: 1
localGroupSize: 4
mode: HA
"#;
        let config: PoolConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode, PoolMode::Ha);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.ha, HaConfig::default());
        assert_eq!(
            config.vulnerability_policy,
            VulnerabilityPolicy::GroupThreshold
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("ha".parse::<PoolMode>().unwrap(), PoolMode::Ha);
        assert_eq!("Normal".parse::<PoolMode>().unwrap(), PoolMode::Normal);
        assert!("raid5".parse::<PoolMode>().is_err());
    }
}
