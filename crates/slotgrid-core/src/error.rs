//! Error types for slotgrid core parsing and validation.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A collaborator handed over a name that maps to no known variant.
    #[error("invalid {kind}: {value:?}")]
    InvalidRegistryType { kind: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoreError {
    pub fn invalid_registry_type(kind: &'static str, value: impl Into<String>) -> Self {
        CoreError::InvalidRegistryType {
            kind,
            value: value.into(),
        }
    }
}
