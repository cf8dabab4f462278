use std::{process::Stdio, time::Duration};

use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    sync::oneshot,
    task::JoinHandle,
    time,
};
use tracing::{debug, error, warn};

use crate::{
    engine::Engine,
    error::{EngineError, Result},
    process::split_command_line,
};

/// Go template that makes the engine print one JSON object per event.
pub const EVENTS_FORMAT: &str = r#"{"name": "{{ .Name }}"}"#;

const READ_CHUNK: usize = 4096;
/// Longest partial line kept while waiting for its newline.
const MAX_PENDING: usize = 1 << 20;
const STOP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ContainerEvent {
    pub name: String,
}

/// Splits a byte stream into newline-terminated lines.
///
/// Bytes after the last newline are held back until the next chunk, so an
/// event written across two reads is reassembled instead of being dropped.
/// A partial line longer than `MAX_PENDING` is discarded up to its newline.
#[derive(Default, Debug)]
pub struct EventDecoder {
    pending: Vec<u8>,
    discarding: bool,
}

impl EventDecoder {
    /// Returns every line completed by `chunk`, skipping blank ones.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        if let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') {
            let rest = self.pending.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.pending, rest);
            let mut split = complete.split(|b| *b == b'\n');
            if std::mem::take(&mut self.discarding) {
                split.next();
            }
            lines = split.filter_map(to_line).collect();
        }
        if self.pending.len() > MAX_PENDING {
            warn!(
                "discarding an event line longer than {MAX_PENDING} bytes ({} bytes buffered)",
                self.pending.len()
            );
            self.pending = Vec::new();
            self.discarding = true;
        }
        lines
    }

    /// Flushes whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        to_line(&rest)
    }
}

fn to_line(bytes: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(bytes).trim().to_string();
    (!line.is_empty()).then_some(line)
}

pub fn decode_event(line: &str) -> Result<ContainerEvent> {
    serde_json::from_str(line).map_err(|e| EngineError::parse("event", e))
}

fn dispatch<F>(line: &str, on_event: &mut F)
where
    F: FnMut(ContainerEvent),
{
    debug!("raw event: {line}");
    match decode_event(line) {
        Ok(event) => {
            debug!("firing callback on container event for {}", event.name);
            on_event(event);
        }
        Err(e) => warn!("skipping event line: {e}"),
    }
}

/// Subscribes to the engine's container lifecycle events.
pub struct EventWatcher;

impl EventWatcher {
    pub fn command_line(engine: &Engine) -> String {
        engine.command_line(&format!(
            "events --filter type=container --format '{EVENTS_FORMAT}'"
        ))
    }

    /// Starts `<engine> events` and calls `on_event` for every decoded event.
    ///
    /// Only a failure to spawn the engine is reported; undecodable lines are
    /// logged and skipped.
    pub fn start<F>(engine: &Engine, on_event: F) -> Result<WatchHandle>
    where
        F: FnMut(ContainerEvent) + Send + 'static,
    {
        Self::start_command(&Self::command_line(engine), on_event)
    }

    /// Like [`EventWatcher::start`] for an arbitrary command emitting event lines.
    pub fn start_command<F>(command_line: &str, on_event: F) -> Result<WatchHandle>
    where
        F: FnMut(ContainerEvent) + Send + 'static,
    {
        let argv = split_command_line(command_line)?;
        debug!("starting event watcher: {command_line}");
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::SpawnFailed {
                command: command_line.to_string(),
                source,
            })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("event watcher stderr: {line}");
                }
            });
        }

        let (cancel, cancelled) = oneshot::channel();
        let task = match child.stdout.take() {
            Some(stdout) => tokio::spawn(pump(stdout, cancelled, on_event)),
            None => tokio::spawn(async {}),
        };

        Ok(WatchHandle {
            command_line: command_line.to_string(),
            child,
            cancel: Some(cancel),
            task,
        })
    }
}

/// Reads chunks until the pipe closes or the watcher is cancelled, dispatching
/// each complete line before reading again.
async fn pump<F>(mut stdout: ChildStdout, mut cancelled: oneshot::Receiver<()>, mut on_event: F)
where
    F: FnMut(ContainerEvent) + Send + 'static,
{
    let mut decoder = EventDecoder::default();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            biased;
            _ = &mut cancelled => {
                debug!("event watcher cancelled");
                return;
            }
            read = stdout.read(&mut chunk) => match read {
                Ok(0) => {
                    if let Some(line) = decoder.finish() {
                        dispatch(&line, &mut on_event);
                    }
                    debug!("event stream closed");
                    return;
                }
                Ok(n) => {
                    for line in decoder.push(&chunk[..n]) {
                        dispatch(&line, &mut on_event);
                    }
                }
                Err(e) => {
                    error!("reading events failed: {e}");
                    return;
                }
            }
        }
    }
}

/// A running event subscription. Dropping it kills the engine process; use
/// [`WatchHandle::stop`] to also wait for the reader to finish.
pub struct WatchHandle {
    command_line: String,
    child: Child,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Whether the reader is still consuming events.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Closes the event pipe, then kills the engine process.
    ///
    /// Teardown problems are logged, never returned. Once this returns the
    /// callback will not be called again.
    pub async fn stop(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }

        let mut task = self.task;
        if time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
            warn!("event reader did not stop in {STOP_TIMEOUT:?}, aborting it");
            task.abort();
            if time::timeout(STOP_TIMEOUT, task).await.is_err() {
                error!("event reader is still busy after abort");
            }
        }

        if let Err(e) = self.child.start_kill() {
            debug!("event process already gone: {e}");
        }
        match time::timeout(STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!("event process exited with {status}"),
            Ok(Err(e)) => error!("cleaning up the event process failed: {e}"),
            Err(_) => error!("event process did not exit in {STOP_TIMEOUT:?}"),
        }
    }
}
