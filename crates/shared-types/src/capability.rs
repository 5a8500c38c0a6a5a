//! # Identifier Grammars
//!
//! Parsers for the two structured identifiers carried by every envelope:
//!
//! - **Schema id**: `<org>/hal/<kind>/<name…>/<major>.<minor>`,
//!   e.g. `tafylabs/hal/motor/differential/1.0`.
//! - **Capability**: `<namespace>.<name>:v<major>.<minor>`,
//!   e.g. `sensor.range-tof:v1.0`.
//!
//! Both are lowercase-only. Versions are plain unsigned integers.

use crate::errors::EnvelopeError;
use std::fmt;
use std::str::FromStr;

/// A parsed payload schema identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaId {
    raw: String,
    major: u32,
    minor: u32,
}

impl SchemaId {
    /// Minimum number of `/`-separated segments: org, `hal`, kind, version.
    const MIN_SEGMENTS: usize = 4;

    /// Parse and validate a schema id.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        let invalid = |reason: &str| EnvelopeError::InvalidSchemaId {
            schema_id: s.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = s.split('/').collect();
        if segments.len() < Self::MIN_SEGMENTS {
            return Err(invalid(
                "expected <org>/hal/<kind>/<name>/<major>.<minor>",
            ));
        }

        let (version, path) = segments
            .split_last()
            .ok_or_else(|| invalid("empty schema id"))?;

        if let Some(bad) = path.iter().find(|seg| !is_lower_token(seg)) {
            return Err(invalid(&format!(
                "segment '{bad}' must be non-empty lowercase [a-z0-9_-]"
            )));
        }

        if path[1] != "hal" {
            return Err(invalid("second segment must be 'hal'"));
        }

        let (major, minor) =
            parse_version(version).ok_or_else(|| invalid("version must be <major>.<minor>"))?;

        Ok(Self {
            raw: s.to_string(),
            major,
            minor,
        })
    }

    /// Everything before the version segment, e.g. `tafylabs/hal/motor/differential`.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.raw
            .rsplit_once('/')
            .map_or(self.raw.as_str(), |(ns, _)| ns)
    }

    /// Schema major version.
    #[must_use]
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Schema minor version.
    #[must_use]
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// The schema id as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for SchemaId {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A parsed device capability tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability {
    namespace: String,
    name: String,
    major: u32,
    minor: u32,
}

impl Capability {
    /// Build a capability from its parts, validating each token.
    pub fn new(namespace: &str, name: &str, major: u32, minor: u32) -> Result<Self, EnvelopeError> {
        Self::parse(&format!("{namespace}.{name}:v{major}.{minor}"))
    }

    /// Parse and validate a capability tag.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        let invalid = |reason: &str| EnvelopeError::InvalidCapability {
            capability: s.to_string(),
            reason: reason.to_string(),
        };

        let (tag, version) = s
            .split_once(':')
            .ok_or_else(|| invalid("missing ':v<major>.<minor>' suffix"))?;
        let (namespace, name) = tag
            .split_once('.')
            .ok_or_else(|| invalid("expected <namespace>.<name>"))?;

        if !is_lower_token(namespace) || !is_lower_token(name) {
            return Err(invalid("namespace and name must be lowercase [a-z0-9_-]"));
        }

        let (major, minor) = version
            .strip_prefix('v')
            .and_then(parse_version)
            .ok_or_else(|| invalid("version must be v<major>.<minor>"))?;

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            major,
            minor,
        })
    }

    /// Capability namespace, e.g. `motor`.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Capability name, e.g. `differential`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol major version.
    #[must_use]
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Protocol minor version.
    #[must_use]
    pub fn minor(&self) -> u32 {
        self.minor
    }
}

impl FromStr for Capability {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}:v{}.{}",
            self.namespace, self.name, self.major, self.minor
        )
    }
}

fn is_lower_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

fn parse_version(s: &str) -> Option<(u32, u32)> {
    let (major, minor) = s.split_once('.')?;
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if !digits(major) || !digits(minor) {
        return None;
    }
    Some((major.parse().ok()?, minor.parse().ok()?))
}
