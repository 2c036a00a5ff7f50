use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Backend user identifier (opaque string).
///
/// Mirrors whatever the backend issues in the token's `uid` claim; the
/// client never interprets its format.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Dot-delimited hierarchical settings key, e.g. `Application.Security`.
///
/// Guaranteed valid by construction: holding a `SectionPath` proves the path
/// is non-empty with non-empty alphanumeric segments. Use
/// `"Application.Security".parse::<SectionPath>()` or
/// `SectionPath::try_from(string)` to create one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SectionPath(String);

impl SectionPath {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl std::fmt::Display for SectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SectionPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for SectionPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let valid = !s.is_empty()
            && s.split('.').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            });
        if valid {
            Ok(Self(s))
        } else {
            Err(Error::SectionPath(s))
        }
    }
}

impl From<SectionPath> for String {
    fn from(p: SectionPath) -> Self {
        p.0
    }
}
