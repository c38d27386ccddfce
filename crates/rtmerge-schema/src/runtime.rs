//! Runtime identifiers.

/// Runtime identifier of one architecture variant (e.g. `osx-arm64`).
///
/// The identifier is interpolated into archive entry paths
/// (`runtimes/<rid>/...`) and into the output layout, so construction
/// rejects anything that could escape a single path component.
///
/// # Example
///
/// ```
/// use rtmerge_schema::RuntimeId;
///
/// let rid: RuntimeId = "osx-arm64".parse().unwrap();
/// assert_eq!(rid.as_str(), "osx-arm64");
/// assert!("../etc".parse::<RuntimeId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct RuntimeId(String);

/// Error returned when a string is not a usable runtime identifier.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid runtime identifier '{0}': expected ASCII letters, digits, '-', '_' or '.'")]
pub struct InvalidRuntimeId(pub String);

impl RuntimeId {
    /// Create a validated runtime identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRuntimeId`] if `s` is empty, is `.` or `..`, or
    /// contains anything other than ASCII alphanumerics, `-`, `_` and `.`.
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidRuntimeId> {
        let s = s.into();
        let valid = !s.is_empty()
            && s != "."
            && s != ".."
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid { Ok(Self(s)) } else { Err(InvalidRuntimeId(s)) }
    }

    /// Built-in identifiers only; skips validation.
    pub(crate) fn from_static(s: &'static str) -> Self {
        Self(s.to_string())
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RuntimeId {
    type Err = InvalidRuntimeId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for RuntimeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> serde::Deserialize<'de> for RuntimeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}
