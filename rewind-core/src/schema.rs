//! Schema versioning for persisted artifacts.
//!
//! Every durable record carries a version; stores refuse to open data whose
//! major version differs from the binary's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::ids::RunId;

/// Current schema version for all persisted records.
pub const SCHEMA_VERSION: SchemaVersion = SchemaVersion { major: 1, minor: 0 };

/// Generator identity stamped into artifact headers.
pub const GENERATOR_NAME: &str = "rewind";
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    /// Records are readable as long as the major version matches.
    pub fn compatible_with(&self, other: &SchemaVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = SchemaVersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| SchemaVersionParseError(s.to_string()))?;
        let major = major
            .parse()
            .map_err(|_| SchemaVersionParseError(s.to_string()))?;
        let minor = minor
            .parse()
            .map_err(|_| SchemaVersionParseError(s.to_string()))?;
        Ok(SchemaVersion { major, minor })
    }
}

#[derive(Debug, Error)]
#[error("invalid schema version string: {0}")]
pub struct SchemaVersionParseError(pub String);

/// Provenance header for run-level artifacts (manifest, checkpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub schema: String,
    pub schema_version: SchemaVersion,
    pub created_at: DateTime<Utc>,
    pub run_id: Option<RunId>,
    pub generator: GeneratorInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorInfo {
    pub name: String,
    pub version: String,
}

impl ArtifactHeader {
    pub fn for_run(schema: &str, run_id: RunId) -> Self {
        Self {
            schema: schema.to_string(),
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now(),
            run_id: Some(run_id),
            generator: GeneratorInfo {
                name: GENERATOR_NAME.to_string(),
                version: GENERATOR_VERSION.to_string(),
            },
        }
    }
}
