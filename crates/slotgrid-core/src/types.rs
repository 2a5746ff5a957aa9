//! Identifiers and shared enums used across slotgrid crates.
//!
//! Every enum that may arrive as a string from a collaborator (config file,
//! cycle input, CLI argument) parses through `FromStr` and fails with
//! [`CoreError::InvalidRegistryType`] on an unknown name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Billing / quota identity a session runs under.
pub type AccessKey = String;
pub type AgentId = String;
pub type SessionId = Uuid;
pub type KernelId = Uuid;
pub type UserId = Uuid;
pub type ProjectId = Uuid;
pub type DomainName = String;
pub type ResourceGroupName = String;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum from a
/// name table. Extra aliases are accepted when parsing only.
macro_rules! registry_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name $(| $alias)* => Ok($ty::$variant),)+
                    other => Err(CoreError::invalid_registry_type($kind, other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    #[default]
    SingleNode,
    MultiNode,
}

registry_enum!(ClusterMode, "cluster mode", {
    SingleNode => "single_node" | "single-node",
    MultiNode => "multi_node" | "multi-node",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Scheduled,
    Preparing,
    Running,
    Terminating,
    Terminated,
    Cancelled,
    Error,
}

registry_enum!(SessionStatus, "session status", {
    Pending => "PENDING",
    Scheduled => "SCHEDULED",
    Preparing => "PREPARING",
    Running => "RUNNING",
    Terminating => "TERMINATING",
    Terminated => "TERMINATED",
    Cancelled => "CANCELLED",
    Error => "ERROR",
});

/// Final outcome of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionResult {
    #[default]
    Undefined,
    Success,
    Failure,
}

registry_enum!(SessionResult, "session result", {
    Undefined => "UNDEFINED",
    Success => "SUCCESS",
    Failure => "FAILURE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentSelectionStrategy {
    #[default]
    Concentrated,
    Dispersed,
    RoundRobin,
    Legacy,
}

registry_enum!(AgentSelectionStrategy, "agent selection strategy", {
    Concentrated => "concentrated",
    Dispersed => "dispersed",
    RoundRobin => "round-robin" | "roundrobin" | "round_robin",
    Legacy => "legacy",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequencerKind {
    Fifo,
    Lifo,
    #[default]
    Drf,
    FairShare,
}

registry_enum!(SequencerKind, "sequencer", {
    Fifo => "fifo",
    Lifo => "lifo",
    Drf => "drf",
    FairShare => "fair-share" | "fairshare" | "fair_share",
});

/// Outcome of one scheduling attempt, as stored in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingResult {
    Success,
    Failure,
    PartialSuccess,
}

registry_enum!(SchedulingResult, "scheduling result", {
    Success => "SUCCESS",
    Failure => "FAILURE",
    PartialSuccess => "PARTIAL_SUCCESS",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_names_and_aliases() {
        assert_eq!("drf".parse::<SequencerKind>().unwrap(), SequencerKind::Drf);
        assert_eq!(
            "fairshare".parse::<SequencerKind>().unwrap(),
            SequencerKind::FairShare
        );
        assert_eq!(
            "round-robin".parse::<AgentSelectionStrategy>().unwrap(),
            AgentSelectionStrategy::RoundRobin
        );
        assert_eq!(
            "PARTIAL_SUCCESS".parse::<SchedulingResult>().unwrap(),
            SchedulingResult::PartialSuccess
        );
    }

    #[test]
    fn unknown_name_is_invalid_registry_type() {
        let err = "random".parse::<AgentSelectionStrategy>().unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidRegistryType {
                kind: "agent selection strategy",
                value: "random".to_string(),
            }
        );
        assert!("FIFO".parse::<SequencerKind>().is_err());
    }

    #[test]
    fn display_matches_serde_name() {
        for kind in [
            SequencerKind::Fifo,
            SequencerKind::Lifo,
            SequencerKind::Drf,
            SequencerKind::FairShare,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
        let json = serde_json::to_string(&SessionStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
    }
}
