//! Integrity Analyzer
//!
//! Read-only assessment of whether the current set of offline drives can
//! still be recovered. Only domains with at least one offline drive are
//! evaluated, group by group, with a selectable vulnerability policy.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::layout::{FaultDomain, LocalGroup, StatusSnapshot, Topology};

/// Offline data drives a group tolerates under the threshold policies
const GROUP_FAILURE_THRESHOLD: usize = 2;

// =============================================================================
// Vulnerability Policy
// =============================================================================

/// Rule deciding when a domain is at risk
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum VulnerabilityPolicy {
    /// More than two offline data drives in any group
    #[default]
    GroupThreshold,
    /// `GroupThreshold`, or more than one offline data drive in a group
    /// whose local parity drive is offline or missing
    ParityAware,
    /// More than one offline data drive in a group, or any offline data
    /// drive in a group whose local parity drive is offline or missing
    Strict,
}

impl VulnerabilityPolicy {
    /// Whether a group in this state puts its domain at risk
    pub fn group_at_risk(&self, failures: usize, parity_available: bool) -> bool {
        match self {
            VulnerabilityPolicy::GroupThreshold => failures > GROUP_FAILURE_THRESHOLD,
            VulnerabilityPolicy::ParityAware => {
                failures > GROUP_FAILURE_THRESHOLD || (failures > 1 && !parity_available)
            }
            VulnerabilityPolicy::Strict => failures > 1 || (failures >= 1 && !parity_available),
        }
    }
}

impl std::fmt::Display for VulnerabilityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VulnerabilityPolicy::GroupThreshold => write!(f, "group-threshold"),
            VulnerabilityPolicy::ParityAware => write!(f, "parity-aware"),
            VulnerabilityPolicy::Strict => write!(f, "strict"),
        }
    }
}

impl std::str::FromStr for VulnerabilityPolicy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "group-threshold" | "groupthreshold" => Ok(VulnerabilityPolicy::GroupThreshold),
            "parity-aware" | "parityaware" => Ok(VulnerabilityPolicy::ParityAware),
            "strict" => Ok(VulnerabilityPolicy::Strict),
            other => Err(crate::error::Error::Configuration(format!(
                "unknown vulnerability policy '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Assessment of one domain with offline drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAssessment {
    pub domain: usize,
    pub name: String,
    pub offline_drives: usize,
    /// Highest count of offline data drives in one group
    pub max_group_failures: usize,
    /// Groups that triggered the policy
    pub groups_at_risk: Vec<usize>,
    pub vulnerable: bool,
}

/// Result of an integrity check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub recoverable: bool,
    pub summary: String,
    pub vulnerable_domains: Vec<usize>,
    pub offline_drives: usize,
    pub policy: VulnerabilityPolicy,
    pub domains: Vec<DomainAssessment>,
}

// =============================================================================
// Analyzer
// =============================================================================

pub struct IntegrityAnalyzer<'a> {
    topology: &'a Topology,
    policy: VulnerabilityPolicy,
}

impl<'a> IntegrityAnalyzer<'a> {
    pub fn new(topology: &'a Topology, policy: VulnerabilityPolicy) -> Self {
        Self { topology, policy }
    }

    /// Evaluate `status`. Never mutates anything.
    pub fn check(&self, status: &StatusSnapshot) -> IntegrityReport {
        let domains: Vec<DomainAssessment> = self
            .topology
            .domains()
            .iter()
            .filter_map(|domain| self.assess_domain(domain, status))
            .collect();

        let offline_drives = status.offline_count();
        let vulnerable: Vec<&DomainAssessment> = domains.iter().filter(|d| d.vulnerable).collect();
        let vulnerable_domains: Vec<usize> = vulnerable.iter().map(|d| d.domain).collect();

        let summary = if offline_drives == 0 {
            "All drives online".to_string()
        } else if !vulnerable.is_empty() {
            let names: Vec<&str> = vulnerable.iter().map(|d| d.name.as_str()).collect();
            format!("Data at risk in {}", names.join(", "))
        } else {
            format!("Recoverable with {} failures", offline_drives)
        };

        debug!(
            policy = %self.policy,
            offline_drives,
            vulnerable = vulnerable_domains.len(),
            "Integrity check: {}",
            summary
        );

        IntegrityReport {
            recoverable: vulnerable_domains.is_empty(),
            summary,
            vulnerable_domains,
            offline_drives,
            policy: self.policy,
            domains,
        }
    }

    fn assess_domain(
        &self,
        domain: &FaultDomain,
        status: &StatusSnapshot,
    ) -> Option<DomainAssessment> {
        let offline_drives = domain.drives().filter(|&id| !status.is_online(id)).count();
        if offline_drives == 0 {
            return None;
        }

        let mut max_group_failures = 0;
        let mut groups_at_risk = Vec::new();
        for group in &domain.groups {
            let failures = group_failures(group, status);
            max_group_failures = max_group_failures.max(failures);

            let parity_available = group
                .parity_drive
                .is_some_and(|parity| status.is_online(parity));
            if self.policy.group_at_risk(failures, parity_available) {
                groups_at_risk.push(group.index);
            }
        }

        Some(DomainAssessment {
            domain: domain.id,
            name: domain.name.clone(),
            offline_drives,
            max_group_failures,
            vulnerable: !groups_at_risk.is_empty(),
            groups_at_risk,
        })
    }
}

fn group_failures(group: &LocalGroup, status: &StatusSnapshot) -> usize {
    group
        .data_drives
        .iter()
        .filter(|&&id| !status.is_online(id))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn offline(total: usize, ids: &[usize]) -> StatusSnapshot {
        let mut status = StatusSnapshot::all_online(total);
        for &id in ids {
            status.set(id, false);
        }
        status
    }

    #[test]
    fn test_all_online() {
        let topology = Topology::build(&PoolConfig::dbox_484()).unwrap();
        let report = IntegrityAnalyzer::new(&topology, VulnerabilityPolicy::GroupThreshold)
            .check(&StatusSnapshot::all_online(484));

        assert!(report.recoverable);
        assert!(report.vulnerable_domains.is_empty());
        assert!(report.domains.is_empty());
        assert_eq!(report.summary, "All drives online");
    }

    #[test]
    fn test_three_failures_in_one_group() {
        let topology = Topology::build(&PoolConfig::dbox_484()).unwrap();
        let status = offline(484, &[44, 45, 46]);

        for policy in [
            VulnerabilityPolicy::GroupThreshold,
            VulnerabilityPolicy::ParityAware,
            VulnerabilityPolicy::Strict,
        ] {
            let report = IntegrityAnalyzer::new(&topology, policy).check(&status);
            assert!(!report.recoverable, "{} should flag the group", policy);
            assert_eq!(report.vulnerable_domains, vec![1]);
            assert_eq!(report.summary, "Data at risk in Domain-1");
        }
    }

    #[test]
    fn test_spread_failures_recoverable() {
        let topology = Topology::build(&PoolConfig::dbox_484()).unwrap();
        // One failure in each group of domain 0, plus a spare
        let status = offline(484, &[0, 13, 26, 42]);

        let report =
            IntegrityAnalyzer::new(&topology, VulnerabilityPolicy::GroupThreshold).check(&status);
        assert!(report.recoverable);
        assert_eq!(report.summary, "Recoverable with 4 failures");
        assert_eq!(report.domains.len(), 1);
        assert_eq!(report.domains[0].max_group_failures, 1);
    }

    #[test]
    fn test_policies_disagree_on_parity_loss() {
        let topology = Topology::build(&PoolConfig::dbox_484()).unwrap();
        // Two data drives and the local parity drive of group 0
        let status = offline(484, &[0, 1, 38]);

        let lenient =
            IntegrityAnalyzer::new(&topology, VulnerabilityPolicy::GroupThreshold).check(&status);
        let aware =
            IntegrityAnalyzer::new(&topology, VulnerabilityPolicy::ParityAware).check(&status);
        assert!(lenient.recoverable);
        assert!(!aware.recoverable);
        assert_eq!(aware.domains[0].groups_at_risk, vec![0]);

        let single = offline(484, &[0, 38]);
        assert!(IntegrityAnalyzer::new(&topology, VulnerabilityPolicy::ParityAware)
            .check(&single)
            .recoverable);
        assert!(!IntegrityAnalyzer::new(&topology, VulnerabilityPolicy::Strict)
            .check(&single)
            .recoverable);
    }

    #[test]
    fn test_unprotected_group_counts_as_parity_lost() {
        let topology = Topology::build(&PoolConfig::single_domain_156()).unwrap();
        let status = offline(156, &[140]);

        assert!(IntegrityAnalyzer::new(&topology, VulnerabilityPolicy::ParityAware)
            .check(&status)
            .recoverable);
        assert!(!IntegrityAnalyzer::new(&topology, VulnerabilityPolicy::Strict)
            .check(&status)
            .recoverable);
    }

    #[test]
    fn test_check_does_not_mutate() {
        let topology = Topology::build(&PoolConfig::quad_domain_156()).unwrap();
        let status = offline(156, &[0, 1, 2, 3]);
        let before = status.clone();
        IntegrityAnalyzer::new(&topology, VulnerabilityPolicy::Strict).check(&status);
        assert_eq!(status, before);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "parity_aware".parse::<VulnerabilityPolicy>().unwrap(),
            VulnerabilityPolicy::ParityAware
        );
        assert!("lenient".parse::<VulnerabilityPolicy>().is_err());
    }
}
