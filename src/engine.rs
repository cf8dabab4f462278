use std::sync::Arc;

use crate::{config::Settings, process::CommandRunner};

/// Shared handle to the engine binary: how to run it and the settings that shape its command lines.
#[derive(Clone)]
pub struct Engine {
    runner: Arc<dyn CommandRunner>,
    settings: Arc<Settings>,
}

impl Engine {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: Settings) -> Self {
        Self {
            runner,
            settings: Arc::new(settings),
        }
    }

    pub fn binary(&self) -> &str {
        &self.settings.engine
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// `<engine> <rest>`
    pub fn command_line(&self, rest: &str) -> String {
        format!("{} {rest}", self.binary())
    }
}
