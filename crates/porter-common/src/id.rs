//! Container ID validation and generation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PorterError, PorterResult};

/// A validated container ID.
///
/// Container IDs must:
/// - Be 1-64 characters long
/// - Contain only alphanumeric characters, hyphens, and underscores
/// - Start with an alphanumeric character
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Maximum length of a container ID.
    pub const MAX_LENGTH: usize = 64;

    /// Create a new container ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> PorterResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Generate a new random container ID.
    ///
    /// The ID is a 12-character hex string derived from a UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        let hex = hex::encode(&uuid.as_bytes()[..6]);
        Self(hex)
    }

    /// Get the container ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate a container ID string.
    fn validate(id: &str) -> PorterResult<()> {
        if id.is_empty() || id.len() > Self::MAX_LENGTH {
            return Err(PorterError::InvalidContainerId { id: id.to_string() });
        }

        let Some(first_char) = id.chars().next() else {
            return Err(PorterError::InvalidContainerId { id: id.to_string() });
        };
        if !first_char.is_ascii_alphanumeric() {
            return Err(PorterError::InvalidContainerId { id: id.to_string() });
        }

        for c in id.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
                return Err(PorterError::InvalidContainerId { id: id.to_string() });
            }
        }

        Ok(())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = PorterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
