use std::{
    fmt::Write as _,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use smart_default::SmartDefault;
use tokio::{
    sync::{RwLock, mpsc},
    task::JoinHandle,
    time,
};
use tracing::{debug, error, warn};

use crate::{
    bindings::label,
    container::Container,
    error::Result,
    events::{EventWatcher, WatchHandle},
    lifecycle::{Action, ActionSet, LifecycleState},
    registry::ContainerRegistry,
};

pub const FETCH_ERROR: &str = "Error occurred when fetching containers";
pub const NO_CONTAINERS: &str = "No containers detected";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuEntry {
    pub name: String,
    pub image: String,
    pub state: LifecycleState,
    pub actions: ActionSet,
    pub details: Option<String>,
}

impl MenuEntry {
    /// Remove is withheld while the container runs so a live container is
    /// never deleted from the menu.
    pub fn from_container(container: &Container, extra_info: bool) -> Self {
        let state = container.lifecycle();
        let mut actions = container.actions();
        if state == LifecycleState::Running {
            actions = actions.without(Action::Remove);
        }
        Self {
            name: container.name.clone(),
            image: container.image.clone(),
            state,
            actions,
            details: extra_info.then(|| container.details()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MenuContent {
    #[default]
    Loading,
    Containers(Vec<MenuEntry>),
    Empty,
    Error(String),
}

#[derive(SmartDefault, Debug)]
pub struct MenuState {
    pub content: MenuContent,
    /// Generation of the snapshot currently shown.
    pub generation: u64,
    #[default(_code = "vec![\"Prune Containers\", \"New Container\"]")]
    pub menu_items: Vec<&'static str>,
    pub last_event: Option<String>,
}

pub type SharedState = Arc<RwLock<MenuState>>;

impl MenuState {
    /// Shows `content` unless a newer snapshot is already displayed.
    pub fn apply(&mut self, generation: u64, content: MenuContent) -> bool {
        if generation <= self.generation {
            debug!(
                "dropping snapshot {generation}, snapshot {} is newer",
                self.generation
            );
            return false;
        }
        self.generation = generation;
        self.content = content;
        true
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for item in &self.menu_items {
            let _ = writeln!(out, "{item}");
        }
        let _ = writeln!(out, "--");
        match &self.content {
            MenuContent::Loading => {
                let _ = writeln!(out, "Loading containers...");
            }
            MenuContent::Empty => {
                let _ = writeln!(out, "{NO_CONTAINERS}");
            }
            MenuContent::Error(message) => {
                let _ = writeln!(out, "{message}");
            }
            MenuContent::Containers(entries) => {
                for entry in entries {
                    render_entry(&mut out, entry);
                }
            }
        }
        out
    }
}

fn render_entry(out: &mut String, entry: &MenuEntry) {
    let _ = writeln!(out, "[{}] {} ({})", entry.state, entry.name, entry.image);
    let labels: Vec<&str> = entry.actions.iter().map(label).collect();
    let _ = writeln!(out, "  actions: {}", labels.join(", "));
    if let Some(details) = &entry.details {
        for line in details.lines() {
            let _ = writeln!(out, "  {line}");
        }
    }
}

/// Fetches snapshots into the shared state. Cheap to clone.
#[derive(Clone)]
pub struct Refresher {
    registry: Arc<ContainerRegistry>,
    state: SharedState,
    generation: Arc<AtomicU64>,
}

impl Refresher {
    pub fn new(registry: Arc<ContainerRegistry>) -> Self {
        Self {
            registry,
            state: SharedState::default(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }

    /// Takes a new snapshot. Returns whether it was shown; a refresh that
    /// finishes after a newer one is discarded.
    pub async fn refresh(&self) -> bool {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let content = self.snapshot().await;
        self.state.write().await.apply(generation, content)
    }

    async fn snapshot(&self) -> MenuContent {
        let mut containers = match self.registry.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                error!("{e}");
                return MenuContent::Error(FETCH_ERROR.to_string());
            }
        };
        if containers.is_empty() {
            return MenuContent::Empty;
        }

        let extra_info = self.registry.engine().settings().extra_info;
        if extra_info {
            let inspected = join_all(containers.iter_mut().map(|c| c.inspect())).await;
            for (container, result) in containers.iter().zip(inspected) {
                if let Err(e) = result {
                    warn!("could not inspect {}: {e}", container.name);
                }
            }
        }
        MenuContent::Containers(
            containers
                .iter()
                .map(|c| MenuEntry::from_container(c, extra_info))
                .collect(),
        )
    }
}

/// The menu while it is open: a snapshot kept fresh by engine events.
pub struct MenuSession {
    refresher: Refresher,
    watcher: Option<WatchHandle>,
    refresh_task: Option<JoinHandle<()>>,
}

impl MenuSession {
    pub fn new(registry: Arc<ContainerRegistry>) -> Self {
        Self {
            refresher: Refresher::new(registry),
            watcher: None,
            refresh_task: None,
        }
    }

    pub fn state(&self) -> SharedState {
        self.refresher.state()
    }

    pub fn refresher(&self) -> &Refresher {
        &self.refresher
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(WatchHandle::is_active)
    }

    /// Renders a fresh snapshot and starts following engine events. A
    /// previous watcher is stopped first.
    pub async fn open(&mut self) -> Result<()> {
        let command_line = EventWatcher::command_line(self.refresher.registry.engine());
        self.open_watching(&command_line).await
    }

    pub async fn open_watching(&mut self, command_line: &str) -> Result<()> {
        self.close().await;

        // Events raised while the first snapshot is taken queue up behind it.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = EventWatcher::start_command(command_line, move |event| {
            let _ = tx.send(event);
        });
        self.refresher.refresh().await;
        let watcher = started?;

        let refresher = self.refresher.clone();
        self.refresh_task = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                debug!("container event for container {}", event.name);
                let mut latest = event.name;
                // A burst of events needs only one snapshot.
                while let Ok(next) = rx.try_recv() {
                    latest = next.name;
                }
                refresher.state.write().await.last_event = Some(latest);
                refresher.refresh().await;
            }
        }));
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stops the watcher and the refresh loop behind it.
    pub async fn close(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        if let Some(mut task) = self.refresh_task.take() {
            if time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                warn!("refresh loop did not finish in {CLOSE_TIMEOUT:?}, aborting it");
                task.abort();
            }
        }
    }
}
