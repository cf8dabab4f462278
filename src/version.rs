use std::{fmt, str::FromStr, sync::Arc};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::{
    error::{EngineError, Result},
    process::CommandRunner,
};

/// Engine client version.
///
/// Ordered lexicographically on `(major, minor, patch)`; a missing patch sorts
/// below every concrete patch, so `2.0` < `2.0.0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

/// First release that reports `Names` as a list and uses `Id`/`State`/`CreatedAt`.
pub const CURRENT_LAYOUT_SINCE: EngineVersion = EngineVersion::new(2, 0, Some(3));

impl EngineVersion {
    pub const fn new(major: u32, minor: u32, patch: Option<u32>) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn newer_or_equal_to(&self, other: &EngineVersion) -> bool {
        self >= other
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unrecognised version string {0:?}")]
pub struct ParseVersionError(String);

fn leading_number(part: &str) -> Option<u32> {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    part[..end].parse().ok()
}

impl FromStr for EngineVersion {
    type Err = ParseVersionError;

    /// Accepts `major.minor[.patch]` with an optional `v` prefix. Anything
    /// after the digits of a component (`-dev`, `-rhel`) is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let mut parts = trimmed.splitn(3, '.');
        let major = parts.next().and_then(leading_number).ok_or_else(err)?;
        let minor = parts.next().and_then(leading_number).ok_or_else(err)?;
        let patch = parts.next().and_then(leading_number);
        Ok(EngineVersion::new(major, minor, patch))
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

/// Which JSON field layout the engine emits for `ps`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordLayout {
    /// Scalar `Names`, `ID`, `Status`, `Created`.
    Legacy,
    /// `Names` list, `Id`, `State`, `CreatedAt`.
    Current,
}

/// Outcome of a version probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectedVersion {
    Known(EngineVersion),
    /// The engine did not report a usable version.
    Legacy,
}

impl DetectedVersion {
    pub fn layout(&self) -> RecordLayout {
        match self {
            DetectedVersion::Known(v) if v.newer_or_equal_to(&CURRENT_LAYOUT_SINCE) => {
                RecordLayout::Current
            }
            _ => RecordLayout::Legacy,
        }
    }
}

/// `Client.Version`, or a top-level `Version` when the client section lacks one.
fn reported_version(report: &Value) -> Option<&str> {
    report
        .get("Client")
        .and_then(|c| c.get("Version"))
        .and_then(Value::as_str)
        .or_else(|| report.get("Version").and_then(Value::as_str))
}

enum Probe {
    Legacy,
    Failed(EngineError),
}

/// Discovers the engine version once and remembers it.
///
/// Concurrent first calls share one probe. A probe that yields no usable
/// version is answered with [`DetectedVersion::Legacy`] but not remembered,
/// so the next call asks the engine again.
pub struct VersionAdapter {
    runner: Arc<dyn CommandRunner>,
    engine: String,
    cached: OnceCell<EngineVersion>,
}

impl VersionAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>, engine: impl Into<String>) -> Self {
        Self {
            runner,
            engine: engine.into(),
            cached: OnceCell::new(),
        }
    }

    pub fn cached(&self) -> Option<EngineVersion> {
        self.cached.get().copied()
    }

    pub async fn discover(&self) -> Result<DetectedVersion> {
        match self.cached.get_or_try_init(|| self.probe()).await {
            Ok(version) => Ok(DetectedVersion::Known(*version)),
            Err(Probe::Legacy) => Ok(DetectedVersion::Legacy),
            Err(Probe::Failed(err)) => Err(err),
        }
    }

    async fn probe(&self) -> Result<EngineVersion, Probe> {
        let command_line = format!("{} version --format json", self.engine);
        let out = self
            .runner
            .run(&command_line)
            .await
            .map_err(Probe::Failed)?;
        debug!("version report: {}", out.trim());

        let report: Value = serde_json::from_str(&out)
            .map_err(|e| Probe::Failed(EngineError::parse("version", e)))?;

        match reported_version(&report).map(str::parse::<EngineVersion>) {
            Some(Ok(version)) => {
                debug!("engine version {version}");
                Ok(version)
            }
            Some(Err(e)) => {
                warn!("{e}, falling back to the layout of engines older than {CURRENT_LAYOUT_SINCE}");
                Err(Probe::Legacy)
            }
            None => {
                warn!(
                    "engine reported no client version, falling back to the layout of engines older than {CURRENT_LAYOUT_SINCE}"
                );
                Err(Probe::Legacy)
            }
        }
    }
}
