use serde_json::Value;
use tracing::{debug, info};

use crate::{
    container::{Container, ContainerRecord},
    engine::Engine,
    error::{EngineError, Result},
    version::{DetectedVersion, VersionAdapter},
};

pub const SCRATCH_IMAGE: &str = "registry.fedoraproject.org/fedora-minimal:rawhide";

/// Produces container snapshots from the engine.
pub struct ContainerRegistry {
    engine: Engine,
    version: VersionAdapter,
}

impl ContainerRegistry {
    pub fn new(engine: Engine) -> Self {
        let version = VersionAdapter::new(engine.runner().clone(), engine.binary());
        Self { engine, version }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn version(&self) -> &VersionAdapter {
        &self.version
    }

    pub fn list_command(&self) -> String {
        let mut command_line = self.engine.command_line("ps -a --format json");
        if let Some(column) = self.engine.settings().sort_by {
            command_line.push_str(" --sort ");
            command_line.push_str(column.as_str());
        }
        command_line
    }

    /// Lists every container in engine order. Any failure fails the whole
    /// snapshot with [`EngineError::FetchFailed`].
    pub async fn list_containers(&self) -> Result<Vec<Container>> {
        let records = self.snapshot().await.map_err(EngineError::fetch)?;
        debug!("found {} containers", records.len());
        Ok(records
            .into_iter()
            .map(|record| Container::new(record, self.engine.clone()))
            .collect())
    }

    async fn snapshot(&self) -> Result<Vec<ContainerRecord>> {
        let version = self.version.discover().await?;
        let out = self.engine.runner().run(&self.list_command()).await?;
        parse_listing(&out, version)
    }

    /// Removes all stopped containers.
    pub async fn prune(&self) -> Result<()> {
        let command_line = self.engine.command_line("container prune -f");
        info!("running command {command_line}");
        self.engine.runner().run(&command_line).await?;
        Ok(())
    }

    /// Starts a detached container with an interactive shell and returns its id.
    pub async fn run_scratch(&self, image: &str) -> Result<String> {
        let command_line = self
            .engine
            .command_line(&format!("run -di {image} /bin/bash"));
        info!("running command {command_line}");
        let out = self.engine.runner().run(&command_line).await?;
        Ok(out.trim().to_string())
    }
}

/// Parses `ps --format json` output. Empty output and `null` mean no containers.
pub fn parse_listing(out: &str, version: DetectedVersion) -> Result<Vec<ContainerRecord>> {
    if out.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Option<Vec<Value>> =
        serde_json::from_str(out).map_err(|e| EngineError::parse("container list", e))?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|value| ContainerRecord::from_engine_record(value, version))
        .collect()
}
