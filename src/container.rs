use std::{collections::BTreeMap, fmt, ops::Deref};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    engine::Engine,
    error::{EngineError, Result},
    lifecycle::{Action, ActionSet, LifecycleState, classify},
    version::{DetectedVersion, RecordLayout},
};

/// Field that older engines report as a string and newer ones as a list of words.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum TextOrList {
    Text(String),
    List(Vec<String>),
}

impl TextOrList {
    fn joined(self) -> String {
        match self {
            TextOrList::Text(s) => s,
            TextOrList::List(words) => words.join(" "),
        }
    }
}

/// Timestamp kept exactly as the engine printed it.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum OpaqueTimestamp {
    Text(String),
    Number(i64),
}

impl OpaqueTimestamp {
    fn into_string(self) -> String {
        match self {
            OpaqueTimestamp::Text(s) => s,
            OpaqueTimestamp::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum StartedAt {
    Epoch(i64),
    Text(String),
}

impl StartedAt {
    fn resolve(self) -> Option<DateTime<Utc>> {
        match self {
            StartedAt::Epoch(secs) if secs > 0 => DateTime::from_timestamp(secs, 0),
            StartedAt::Epoch(_) => None,
            StartedAt::Text(s) => DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|t| t.with_timezone(&Utc))
                .filter(|t| t.timestamp() > 0),
        }
    }
}

#[derive(Deserialize, Debug)]
struct PortMapping {
    #[serde(default, alias = "hostIP")]
    host_ip: String,
    #[serde(default, alias = "hostPort")]
    host_port: u32,
    #[serde(default, alias = "containerPort")]
    container_port: u32,
    #[serde(default)]
    protocol: String,
}

impl PortMapping {
    fn describe(&self) -> String {
        format!(
            "host {}:{}/{} -> pod {}",
            self.host_ip, self.host_port, self.protocol, self.container_port
        )
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum PortsField {
    Text(String),
    List(Vec<PortMapping>),
}

/// Published ports in display form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ports {
    NotApplicable,
    Mapped(Vec<String>),
}

impl Ports {
    fn from_field(field: Option<PortsField>) -> Self {
        match field {
            None => Ports::NotApplicable,
            Some(PortsField::Text(s)) if s.trim().is_empty() => Ports::NotApplicable,
            Some(PortsField::Text(s)) => Ports::Mapped(vec![s]),
            Some(PortsField::List(list)) if list.is_empty() => Ports::NotApplicable,
            Some(PortsField::List(list)) => {
                Ports::Mapped(list.iter().map(PortMapping::describe).collect())
            }
        }
    }
}

impl fmt::Display for Ports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ports::NotApplicable => f.write_str("n/a"),
            Ports::Mapped(ports) => f.write_str(&ports.join(", ")),
        }
    }
}

/// Fields both layouts spell the same way.
#[derive(Deserialize, Debug)]
struct SharedFields {
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Command", default)]
    command: Option<TextOrList>,
    #[serde(rename = "Entrypoint", default)]
    entrypoint: Option<TextOrList>,
    #[serde(rename = "StartedAt", default)]
    started_at: Option<StartedAt>,
    #[serde(rename = "Ports", default)]
    ports: Option<PortsField>,
}

/// `ps` entry from engines before 2.0.3.
#[derive(Deserialize, Debug)]
pub struct LegacyRecord {
    #[serde(rename = "Names", default)]
    names: Option<String>,
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Created", default)]
    created: Option<OpaqueTimestamp>,
    #[serde(flatten)]
    shared: SharedFields,
}

/// `ps` entry from engines 2.0.3 and later.
#[derive(Deserialize, Debug)]
pub struct CurrentRecord {
    #[serde(rename = "Names", default)]
    names: Option<Vec<String>>,
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "CreatedAt", default)]
    created_at: Option<OpaqueTimestamp>,
    #[serde(flatten)]
    shared: SharedFields,
}

/// One raw `ps` entry, decoded with the layout its engine version implies.
#[derive(Debug)]
pub enum EngineRecord {
    Legacy(LegacyRecord),
    Current(CurrentRecord),
}

impl EngineRecord {
    pub fn decode(raw: Value, layout: RecordLayout) -> Result<Self> {
        let record = match layout {
            RecordLayout::Legacy => serde_json::from_value(raw).map(EngineRecord::Legacy),
            RecordLayout::Current => serde_json::from_value(raw).map(EngineRecord::Current),
        };
        record.map_err(|e| EngineError::parse("container record", e))
    }
}

/// Canonical, engine-version-independent container description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerRecord {
    pub name: String,
    pub id: String,
    pub raw_status: String,
    pub created_at: String,
    pub started_at: Option<DateTime<Utc>>,
    pub image: String,
    pub command: String,
    pub entrypoint: String,
    pub ports: Ports,
    pub ip_address: Option<String>,
}

fn canonical(
    name: Option<String>,
    id: String,
    raw_status: String,
    created: Option<OpaqueTimestamp>,
    shared: SharedFields,
) -> ContainerRecord {
    let name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| id.clone());
    ContainerRecord {
        name,
        id,
        raw_status,
        created_at: created.map(OpaqueTimestamp::into_string).unwrap_or_default(),
        started_at: shared.started_at.and_then(StartedAt::resolve),
        image: shared.image,
        command: shared.command.map(TextOrList::joined).unwrap_or_default(),
        entrypoint: shared.entrypoint.map(TextOrList::joined).unwrap_or_default(),
        ports: Ports::from_field(shared.ports),
        ip_address: None,
    }
}

impl From<LegacyRecord> for ContainerRecord {
    fn from(r: LegacyRecord) -> Self {
        canonical(r.names, r.id, r.status, r.created, r.shared)
    }
}

impl From<CurrentRecord> for ContainerRecord {
    fn from(r: CurrentRecord) -> Self {
        let name = r.names.and_then(|names| names.into_iter().next());
        canonical(name, r.id, r.state, r.created_at, r.shared)
    }
}

impl From<EngineRecord> for ContainerRecord {
    fn from(record: EngineRecord) -> Self {
        match record {
            EngineRecord::Legacy(r) => r.into(),
            EngineRecord::Current(r) => r.into(),
        }
    }
}

impl ContainerRecord {
    pub fn from_engine_record(raw: Value, version: DetectedVersion) -> Result<Self> {
        EngineRecord::decode(raw, version.layout()).map(ContainerRecord::from)
    }

    pub fn lifecycle(&self) -> LifecycleState {
        classify(&self.raw_status)
    }

    pub fn actions(&self) -> ActionSet {
        ActionSet::for_state(self.lifecycle())
    }

    /// Multi-line summary used for the extra-info block and "copy details".
    pub fn details(&self) -> String {
        let started = self
            .started_at
            .map(|t| t.to_string())
            .unwrap_or_else(|| "never".to_string());
        let mut lines = vec![
            format!("Status: {}", self.raw_status),
            format!("Image: {}", self.image),
            format!("Created: {}", self.created_at),
            format!("Started: {started}"),
        ];
        if !self.command.is_empty() {
            lines.push(format!("Command: {}", self.command));
        }
        if !self.entrypoint.is_empty() {
            lines.push(format!("Entrypoint: {}", self.entrypoint));
        }
        lines.push(format!("Ports: {}", self.ports));
        lines.push(format!(
            "IP Address: {}",
            self.ip_address.as_deref().unwrap_or("n/a")
        ));
        lines.join("\n")
    }
}

impl fmt::Display for ContainerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name: {} id: {} status: {} image: {}",
            self.name, self.id, self.raw_status, self.image
        )
    }
}

#[derive(Deserialize)]
struct InspectEntry {
    #[serde(rename = "NetworkSettings", default)]
    network_settings: Option<NetworkSettings>,
}

#[derive(Deserialize)]
struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: Option<String>,
    #[serde(rename = "Networks", default)]
    networks: Option<BTreeMap<String, NetworkEndpoint>>,
}

#[derive(Deserialize)]
struct NetworkEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: Option<String>,
}

impl NetworkSettings {
    // Rootless containers leave the top-level address empty and report it per network.
    fn address(self) -> Option<String> {
        let non_empty = |ip: Option<String>| ip.filter(|ip| !ip.is_empty());
        non_empty(self.ip_address).or_else(|| {
            self.networks?
                .into_values()
                .find_map(|endpoint| non_empty(endpoint.ip_address))
        })
    }
}

const TERM_KEEP_ON_EXIT: bool = true;
const TERM_CLOSE_ON_EXIT: bool = false;

/// A container from a snapshot together with the engine that reported it.
pub struct Container {
    record: ContainerRecord,
    engine: Engine,
    inspected: bool,
}

impl Container {
    pub fn new(record: ContainerRecord, engine: Engine) -> Self {
        Self {
            record,
            engine,
            inspected: false,
        }
    }

    pub fn record(&self) -> &ContainerRecord {
        &self.record
    }

    pub fn into_record(self) -> ContainerRecord {
        self.record
    }

    /// Resolves the container's private address with a full object dump.
    ///
    /// Only the first call per snapshot reaches the engine.
    pub async fn inspect(&mut self) -> Result<()> {
        if self.inspected {
            return Ok(());
        }
        let command_line = self
            .engine
            .command_line(&format!("inspect --format json {}", self.record.name));
        let out = self.engine.runner().run(&command_line).await?;
        let entries: Option<Vec<InspectEntry>> =
            serde_json::from_str(&out).map_err(|e| EngineError::parse("inspect", e))?;

        self.record.ip_address = entries
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|entry| entry.network_settings)
            .and_then(NetworkSettings::address);
        debug!(
            "container {} has address {:?}",
            self.record.name, self.record.ip_address
        );
        self.inspected = true;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.run_verb("start").await
    }

    pub async fn stop(&self) -> Result<()> {
        self.run_verb("stop").await
    }

    pub async fn restart(&self) -> Result<()> {
        self.run_verb("restart").await
    }

    pub async fn pause(&self) -> Result<()> {
        self.run_verb("pause").await
    }

    pub async fn unpause(&self) -> Result<()> {
        self.run_verb("unpause").await
    }

    pub async fn remove(&self) -> Result<()> {
        self.run_verb("rm").await
    }

    /// Follows the logs in a terminal. The terminal stays open after the stream
    /// ends unless the container is running.
    pub fn logs(&self) -> Result<()> {
        let keep_open = if self.record.lifecycle() == LifecycleState::Running {
            TERM_CLOSE_ON_EXIT
        } else {
            TERM_KEEP_ON_EXIT
        };
        let command = self.engine.command_line("logs -f");
        self.run_in_terminal(&command, "", keep_open)
    }

    pub fn watch_top(&self) -> Result<()> {
        let command = format!("watch {}", self.engine.command_line("top"));
        self.run_in_terminal(&command, "", TERM_CLOSE_ON_EXIT)
    }

    pub fn shell(&self) -> Result<()> {
        let command = self.engine.command_line("exec -it");
        self.run_in_terminal(&command, "/bin/sh", TERM_CLOSE_ON_EXIT)
    }

    pub fn stats(&self) -> Result<()> {
        let command = self.engine.command_line("stats");
        self.run_in_terminal(&command, "", TERM_CLOSE_ON_EXIT)
    }

    /// Runs `action` without consulting the state's [`ActionSet`]; callers
    /// decide whether a disabled action may still be attempted.
    pub async fn perform(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Start => self.start().await,
            Action::Stop => self.stop().await,
            Action::Restart => self.restart().await,
            Action::Pause => self.pause().await,
            Action::Unpause => self.unpause().await,
            Action::Remove => self.remove().await,
            Action::Logs => self.logs(),
            Action::Top => self.watch_top(),
            Action::Shell => self.shell(),
            Action::Stats => self.stats(),
            Action::Inspect => self.inspect().await,
        }
    }

    async fn run_verb(&self, verb: &str) -> Result<()> {
        let command_line = self
            .engine
            .command_line(&format!("{verb} {}", self.record.name));
        info!("running command {command_line}");
        self.engine.runner().run(&command_line).await?;
        info!("command {verb} on {} terminated successfully", self.record.name);
        Ok(())
    }

    fn run_in_terminal(&self, command: &str, args: &str, keep_open: bool) -> Result<()> {
        let command_line = terminal_command_line(
            &self.engine.settings().terminal,
            command,
            &self.record.name,
            args,
            keep_open,
        );
        self.engine.runner().run_detached(&command_line)
    }
}

fn terminal_command_line(
    terminal: &str,
    command: &str,
    name: &str,
    args: &str,
    keep_open: bool,
) -> String {
    let inner = [command, name, args]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if keep_open {
        format!("{terminal} bash -c '{inner};read i'")
    } else {
        format!("{terminal} {inner}")
    }
}

impl Deref for Container {
    type Target = ContainerRecord;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("record", &self.record)
            .field("inspected", &self.inspected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        config::Settings, error::ErrorKind, process::fake::ScriptedRunner,
        version::EngineVersion,
    };

    fn current() -> DetectedVersion {
        DetectedVersion::Known(EngineVersion::new(4, 9, Some(3)))
    }

    fn legacy() -> DetectedVersion {
        DetectedVersion::Known(EngineVersion::new(1, 9, Some(3)))
    }

    fn current_json() -> Value {
        json!({
            "Names": ["web", "web-alias"],
            "Id": "3f1c2a9b8d7e",
            "State": "running",
            "Status": "Up 2 hours",
            "CreatedAt": "2024-03-01 10:00:00 +0000 UTC",
            "Image": "docker.io/library/nginx:latest",
            "Command": ["nginx", "-g", "daemon off;"],
            "StartedAt": 1709287200,
            "Ports": [{"host_ip": "", "container_port": 80, "host_port": 8080, "range": 1, "protocol": "tcp"}]
        })
    }

    fn legacy_json() -> Value {
        json!({
            "Names": "web",
            "ID": "3f1c2a9b8d7e",
            "Status": "running",
            "Created": "2024-03-01 10:00:00 +0000 UTC",
            "Image": "docker.io/library/nginx:latest",
            "Command": "nginx -g daemon off;",
            "StartedAt": 1709287200,
            "Ports": [{"hostIP": "", "containerPort": 80, "hostPort": 8080, "protocol": "tcp"}]
        })
    }

    fn container(runner: Arc<ScriptedRunner>, record: ContainerRecord) -> Container {
        Container::new(record, Engine::new(runner, Settings::default()))
    }

    #[test]
    fn both_layouts_parse_to_the_same_record() {
        let from_current = ContainerRecord::from_engine_record(current_json(), current()).unwrap();
        let from_legacy = ContainerRecord::from_engine_record(legacy_json(), legacy()).unwrap();
        assert_eq!(from_current, from_legacy);

        assert_eq!("web", from_current.name);
        assert_eq!("3f1c2a9b8d7e", from_current.id);
        assert_eq!("running", from_current.raw_status);
        assert_eq!("nginx -g daemon off;", from_current.command);
        assert_eq!(
            Ports::Mapped(vec!["host :8080/tcp -> pod 80".to_string()]),
            from_current.ports
        );
        assert_eq!(
            Some(1709287200),
            from_current.started_at.map(|t| t.timestamp())
        );
        assert_eq!(None, from_current.ip_address);
    }

    #[test]
    fn current_layout_uses_state_not_status() {
        let record = ContainerRecord::from_engine_record(current_json(), current()).unwrap();
        assert_eq!("running", record.raw_status);
        assert_eq!(LifecycleState::Running, record.lifecycle());
    }

    #[test]
    fn legacy_version_rejects_current_layout() {
        let err = ContainerRecord::from_engine_record(current_json(), legacy()).unwrap_err();
        assert_eq!(ErrorKind::ParseFailed, err.kind());
    }

    #[test]
    fn unknown_version_uses_legacy_layout() {
        let record =
            ContainerRecord::from_engine_record(legacy_json(), DetectedVersion::Legacy).unwrap();
        assert_eq!("web", record.name);
    }

    #[test]
    fn empty_ports_are_not_applicable() {
        for ports in [json!(""), json!(null), json!([])] {
            let mut raw = current_json();
            raw["Ports"] = ports.clone();
            let record = ContainerRecord::from_engine_record(raw, current()).unwrap();
            assert_eq!(Ports::NotApplicable, record.ports, "{ports}");
            assert_eq!("n/a", record.ports.to_string());
        }
    }

    #[test]
    fn zero_or_missing_start_time_means_never_started() {
        let mut raw = current_json();
        raw["StartedAt"] = json!(0);
        let record = ContainerRecord::from_engine_record(raw, current()).unwrap();
        assert_eq!(None, record.started_at);

        let mut raw = current_json();
        raw.as_object_mut().unwrap().remove("StartedAt");
        let record = ContainerRecord::from_engine_record(raw, current()).unwrap();
        assert_eq!(None, record.started_at);
    }

    #[test]
    fn missing_names_fall_back_to_id() {
        let mut raw = current_json();
        raw["Names"] = json!([]);
        let record = ContainerRecord::from_engine_record(raw, current()).unwrap();
        assert_eq!("3f1c2a9b8d7e", record.name);
    }

    #[test]
    fn numeric_created_is_kept_verbatim() {
        let mut raw = legacy_json();
        raw["Created"] = json!(1709287100);
        let record = ContainerRecord::from_engine_record(raw, legacy()).unwrap();
        assert_eq!("1709287100", record.created_at);
    }

    #[test]
    fn details_lists_known_fields() {
        let mut record = ContainerRecord::from_engine_record(current_json(), current()).unwrap();
        record.entrypoint = "/docker-entrypoint.sh".into();
        insta::assert_snapshot!(record.details(), @r"
        Status: running
        Image: docker.io/library/nginx:latest
        Created: 2024-03-01 10:00:00 +0000 UTC
        Started: 2024-03-01 10:00:00 UTC
        Command: nginx -g daemon off;
        Entrypoint: /docker-entrypoint.sh
        Ports: host :8080/tcp -> pod 80
        IP Address: n/a
        ");
    }

    #[test]
    fn details_of_a_fresh_container() {
        let raw = json!({
            "Names": ["scratch"],
            "Id": "abc",
            "State": "created",
            "CreatedAt": "2024-03-01",
            "Image": "fedora",
            "StartedAt": 0,
            "Ports": null
        });
        let record = ContainerRecord::from_engine_record(raw, current()).unwrap();
        insta::assert_snapshot!(record.details(), @r"
        Status: created
        Image: fedora
        Created: 2024-03-01
        Started: never
        Ports: n/a
        IP Address: n/a
        ");
    }

    #[tokio::test]
    async fn inspect_resolves_address_once() {
        let runner = Arc::new(ScriptedRunner::new().reply(
            "podman inspect --format json web",
            r#"[{"Id": "3f1c", "NetworkSettings": {"IPAddress": "10.88.0.7"}}]"#,
        ));
        let record = ContainerRecord::from_engine_record(current_json(), current()).unwrap();
        let mut web = container(runner.clone(), record);

        web.inspect().await.unwrap();
        web.inspect().await.unwrap();
        assert_eq!(Some("10.88.0.7"), web.ip_address.as_deref());
        assert_eq!(1, runner.calls().len());
    }

    #[tokio::test]
    async fn inspect_reads_per_network_address() {
        let runner = Arc::new(ScriptedRunner::new().reply(
            "podman inspect --format json web",
            r#"[{"NetworkSettings": {"IPAddress": "", "Networks": {"podman": {"IPAddress": "10.89.0.4"}}}}]"#,
        ));
        let record = ContainerRecord::from_engine_record(current_json(), current()).unwrap();
        let mut web = container(runner, record);
        web.inspect().await.unwrap();
        assert_eq!(Some("10.89.0.4"), web.ip_address.as_deref());
    }

    #[tokio::test]
    async fn inspect_without_network_settings_leaves_address_empty() {
        let runner = Arc::new(ScriptedRunner::new().reply(
            "podman inspect --format json web",
            r#"[{"NetworkSettings": null}]"#,
        ));
        let record = ContainerRecord::from_engine_record(current_json(), current()).unwrap();
        let mut web = container(runner.clone(), record);
        web.inspect().await.unwrap();
        web.inspect().await.unwrap();
        assert_eq!(None, web.ip_address);
        assert_eq!(1, runner.calls().len());
    }

    #[tokio::test]
    async fn failed_inspect_can_be_retried() {
        let runner = Arc::new(ScriptedRunner::new().fail(
            "podman inspect --format json web",
            125,
            "no such container",
        ));
        let record = ContainerRecord::from_engine_record(current_json(), current()).unwrap();
        let mut web = container(runner.clone(), record);
        assert_eq!(ErrorKind::CommandFailed, web.inspect().await.unwrap_err().kind());
        assert!(web.inspect().await.is_err());
        assert_eq!(2, runner.calls().len());
    }

    #[tokio::test]
    async fn verbs_run_engine_commands() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("podman stop web", "web\n")
                .reply("podman rm web", "web\n")
                .fail("podman unpause web", 125, "not paused"),
        );
        let record = ContainerRecord::from_engine_record(current_json(), current()).unwrap();
        let mut web = container(runner.clone(), record);

        web.perform(Action::Stop).await.unwrap();
        web.remove().await.unwrap();
        let err = web.unpause().await.unwrap_err();
        assert_eq!(ErrorKind::CommandFailed, err.kind());
        assert_eq!(
            vec!["podman stop web", "podman rm web", "podman unpause web"],
            runner.calls()
        );
    }

    #[tokio::test]
    async fn terminal_actions_are_detached() {
        let runner = Arc::new(ScriptedRunner::new());
        let record = ContainerRecord::from_engine_record(current_json(), current()).unwrap();
        let mut web = container(runner.clone(), record.clone());
        web.perform(Action::Logs).await.unwrap();
        web.perform(Action::Top).await.unwrap();
        web.perform(Action::Shell).await.unwrap();
        web.perform(Action::Stats).await.unwrap();

        let mut exited = record;
        exited.raw_status = "exited".into();
        container(runner.clone(), exited).logs().unwrap();

        assert_eq!(
            vec![
                "gnome-terminal -- podman logs -f web",
                "gnome-terminal -- watch podman top web",
                "gnome-terminal -- podman exec -it web /bin/sh",
                "gnome-terminal -- podman stats web",
                "gnome-terminal -- bash -c 'podman logs -f web;read i'",
            ],
            runner.detached()
        );
        assert!(runner.calls().is_empty());
    }
}
