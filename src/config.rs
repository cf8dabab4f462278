use std::fmt;

use serde::Deserialize;
use smart_default::SmartDefault;

/// Columns the engine can sort its container listing by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortColumn {
    Command,
    Created,
    Id,
    Image,
    Names,
    Runningfor,
    Size,
    Status,
}

impl SortColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortColumn::Command => "command",
            SortColumn::Created => "created",
            SortColumn::Id => "id",
            SortColumn::Image => "image",
            SortColumn::Names => "names",
            SortColumn::Runningfor => "runningfor",
            SortColumn::Size => "size",
            SortColumn::Status => "status",
        }
    }
}

impl fmt::Display for SortColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the user's preferences. The core never writes these back.
#[derive(SmartDefault, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Engine binary, resolved through `PATH`.
    #[default = "podman"]
    pub engine: String,
    /// Terminal program plus the arguments it needs to run a trailing command.
    #[default = "gnome-terminal --"]
    pub terminal: String,
    /// Show the detailed block under each container.
    pub extra_info: bool,
    pub sort_by: Option<SortColumn>,
}
