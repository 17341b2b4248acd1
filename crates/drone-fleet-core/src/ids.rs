//! Identifier types for drone-fleet.
//!
//! Drones are identified locally by a [`DroneUuid`], which is generated once when the
//! drone is created and never changes afterwards, even across checkpoint/restore.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters in the random suffix of a drone uuid.
const SUFFIX_LEN: usize = 10;

/// A locally generated, stable drone identifier.
///
/// The textual form is `{site}-{suffix}`, where `site` is the lowercased site name and
/// `suffix` is ten lowercase hex characters taken from a random UUID v4. Backends use
/// this value as the name of the leased resource and as the batch-system machine name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DroneUuid(String);

impl DroneUuid {
    /// Generate a new random `DroneUuid` for the given site.
    #[must_use]
    pub fn generate(site_name: &str) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self::from_parts(site_name, &random[..SUFFIX_LEN])
    }

    /// Build a `DroneUuid` from a site name and an explicit suffix.
    ///
    /// Useful for deterministic identifiers in tests.
    #[must_use]
    pub fn from_parts(site_name: &str, suffix: &str) -> Self {
        Self(format!("{}-{suffix}", site_name.to_lowercase()))
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the identifier as raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for DroneUuid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (site, suffix) = s.rsplit_once('-').ok_or(IdError::MissingSite)?;
        if site.is_empty() {
            return Err(IdError::MissingSite);
        }
        if suffix.len() != SUFFIX_LEN {
            return Err(IdError::InvalidLength {
                expected: SUFFIX_LEN,
                got: suffix.len(),
            });
        }
        if !suffix
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(IdError::InvalidHex);
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for DroneUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DroneUuid({})", self.0)
    }
}

impl fmt::Display for DroneUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DroneUuid {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DroneUuid> for String {
    fn from(id: DroneUuid) -> Self {
        id.0
    }
}

impl AsRef<[u8]> for DroneUuid {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The suffix contains characters other than lowercase hex digits.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// The suffix has an incorrect length.
    #[error("invalid length: expected {expected} characters, got {got}")]
    InvalidLength {
        /// The expected number of characters.
        expected: usize,
        /// The actual number of characters.
        got: usize,
    },

    /// The identifier has no `{site}-` prefix.
    #[error("missing site prefix")]
    MissingSite,
}
