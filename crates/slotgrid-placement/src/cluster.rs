//! Cluster role, index, local rank and hostname assignment.
//!
//! A session with a single kernel spec and `cluster_size > 1` is expanded
//! into `cluster_size` kernels: one `main` followed by `sub1..sub{n-1}`.
//! With several specs, declared fields are kept as given and the gaps are
//! filled in order: the first spec without a role becomes `main` unless a
//! spec before it already claimed that role, every other one becomes a
//! `sub` numbered by its own counter starting at 1.

use serde::{Deserialize, Serialize};
use tracing::trace;

use slotgrid_core::ClusterMode;

pub const MAIN_ROLE: &str = "main";
pub const SUB_ROLE: &str = "sub";

/// Cluster fields a kernel spec may declare up front.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelClusterSpec {
    pub cluster_role: Option<String>,
    pub cluster_idx: Option<u32>,
    pub cluster_hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelClusterConfig {
    /// Position of the spec this kernel was built from.
    pub spec_index: usize,
    pub cluster_role: String,
    pub cluster_idx: u32,
    pub cluster_hostname: String,
    pub local_rank: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConfigurationRule {
    pub cluster_mode: ClusterMode,
    pub cluster_size: u32,
}

impl ClusterConfigurationRule {
    pub fn new(cluster_mode: ClusterMode, cluster_size: u32) -> Self {
        Self {
            cluster_mode,
            cluster_size,
        }
    }

    /// One resolved config per kernel of the session.
    pub fn apply(&self, specs: &[KernelClusterSpec]) -> Vec<KernelClusterConfig> {
        let configs = if specs.len() == 1 && self.cluster_size > 1 {
            self.replicate()
        } else {
            assign_positionally(specs)
        };
        trace!(
            mode = %self.cluster_mode,
            size = self.cluster_size,
            kernels = configs.len(),
            "cluster layout resolved"
        );
        configs
    }

    /// Main is `main1` (index 1); subs are `sub1..sub{k-1}`, so index 1 appears in both roles.
    fn replicate(&self) -> Vec<KernelClusterConfig> {
        (0..self.cluster_size)
            .map(|i| {
                let (role, idx) = if i == 0 { (MAIN_ROLE, 1) } else { (SUB_ROLE, i) };
                KernelClusterConfig {
                    spec_index: 0,
                    cluster_role: role.to_string(),
                    cluster_idx: idx,
                    cluster_hostname: format!("{role}{idx}"),
                    local_rank: i,
                }
            })
            .collect()
    }
}

fn assign_positionally(specs: &[KernelClusterSpec]) -> Vec<KernelClusterConfig> {
    let mut main_claimed = false;
    let mut next_sub_idx = 1;
    let mut configs = Vec::with_capacity(specs.len());

    for (position, spec) in specs.iter().enumerate() {
        let role = match &spec.cluster_role {
            Some(role) => role.clone(),
            None if !main_claimed => MAIN_ROLE.to_string(),
            None => SUB_ROLE.to_string(),
        };
        main_claimed |= role == MAIN_ROLE;

        let idx = match spec.cluster_idx {
            Some(idx) => idx,
            None if role == MAIN_ROLE => 1,
            None => {
                let idx = next_sub_idx;
                next_sub_idx += 1;
                idx
            }
        };
        let hostname = spec
            .cluster_hostname
            .clone()
            .unwrap_or_else(|| format!("{role}{idx}"));

        configs.push(KernelClusterConfig {
            spec_index: position,
            cluster_role: role,
            cluster_idx: idx,
            cluster_hostname: hostname,
            local_rank: position as u32,
        });
    }
    configs
}
