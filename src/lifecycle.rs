use std::fmt;

/// Canonical container state derived from the engine's free-text status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Stopped,
    Running,
    Paused,
    Unknown,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Running => "running",
            LifecycleState::Paused => "paused",
            LifecycleState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a raw status such as `"Exited (0) 3 hours ago"` to its state.
///
/// Only the first whitespace-delimited token is considered, case-insensitively.
/// Unrecognised tokens yield [`LifecycleState::Unknown`].
pub fn classify(raw_status: &str) -> LifecycleState {
    let token = raw_status.split_whitespace().next().unwrap_or_default();
    match token.to_ascii_lowercase().as_str() {
        "exited" | "created" | "configured" | "stopped" => LifecycleState::Stopped,
        "up" | "running" => LifecycleState::Running,
        "paused" => LifecycleState::Paused,
        _ => LifecycleState::Unknown,
    }
}

/// Something a user can do with a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
    Remove,
    Logs,
    Top,
    Shell,
    Stats,
    Inspect,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::Start,
        Action::Stop,
        Action::Restart,
        Action::Pause,
        Action::Unpause,
        Action::Remove,
        Action::Logs,
        Action::Top,
        Action::Shell,
        Action::Stats,
        Action::Inspect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Pause => "pause",
            Action::Unpause => "unpause",
            Action::Remove => "remove",
            Action::Logs => "logs",
            Action::Top => "top",
            Action::Shell => "shell",
            Action::Stats => "stats",
            Action::Inspect => "inspect",
        }
    }

    /// Whether the action runs in a user-visible terminal rather than being captured.
    pub fn is_interactive(&self) -> bool {
        matches!(self, Action::Logs | Action::Top | Action::Shell | Action::Stats)
    }

    fn bit(&self) -> u16 {
        1 << (*self as u16)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ActionSet(u16);

impl ActionSet {
    pub const fn empty() -> Self {
        ActionSet(0)
    }

    pub fn of(actions: &[Action]) -> Self {
        actions.iter().fold(ActionSet::empty(), |set, a| set.with(*a))
    }

    /// Actions legal in `state`. Inspect is always available.
    pub fn for_state(state: LifecycleState) -> Self {
        let enabled: &[Action] = match state {
            LifecycleState::Stopped => &[Action::Start, Action::Remove],
            LifecycleState::Running => &[
                Action::Stop,
                Action::Restart,
                Action::Pause,
                Action::Logs,
                Action::Top,
                Action::Shell,
                Action::Stats,
            ],
            LifecycleState::Paused => &[Action::Unpause],
            LifecycleState::Unknown => &[],
        };
        ActionSet::of(enabled).with(Action::Inspect)
    }

    pub fn with(self, action: Action) -> Self {
        ActionSet(self.0 | action.bit())
    }

    pub fn without(self, action: Action) -> Self {
        ActionSet(self.0 & !action.bit())
    }

    pub fn contains(&self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Action> + '_ {
        Action::ALL.into_iter().filter(|a| self.contains(*a))
    }
}

impl fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_table_tokens_in_any_casing() {
        let cases = [
            ("Exited (0) 3 hours ago", LifecycleState::Stopped),
            ("exited", LifecycleState::Stopped),
            ("Created", LifecycleState::Stopped),
            ("CONFIGURED", LifecycleState::Stopped),
            ("stopped", LifecycleState::Stopped),
            ("Up 2 hours", LifecycleState::Running),
            ("RUNNING since 2h", LifecycleState::Running),
            ("running", LifecycleState::Running),
            ("Paused", LifecycleState::Paused),
            ("pAuSeD for a while", LifecycleState::Paused),
        ];
        for (raw, expected) in cases {
            assert_eq!(expected, classify(raw), "{raw:?}");
        }
    }

    #[test]
    fn unrecognised_status_is_unknown() {
        for raw in ["", "   ", "removing", "dead", "upward", "Restarting (1) 5s ago"] {
            assert_eq!(LifecycleState::Unknown, classify(raw), "{raw:?}");
        }
    }

    #[test]
    fn classify_ignores_leading_whitespace() {
        assert_eq!(LifecycleState::Running, classify("  Up 5 minutes"));
    }

    #[test]
    fn actions_follow_state() {
        let stopped = ActionSet::for_state(LifecycleState::Stopped);
        assert!(stopped.contains(Action::Start));
        assert!(stopped.contains(Action::Remove));
        assert!(!stopped.contains(Action::Stop));
        assert!(!stopped.contains(Action::Pause));

        let running = ActionSet::for_state(LifecycleState::Running);
        for action in [
            Action::Stop,
            Action::Restart,
            Action::Pause,
            Action::Logs,
            Action::Top,
            Action::Shell,
            Action::Stats,
        ] {
            assert!(running.contains(action), "{action}");
        }
        assert!(!running.contains(Action::Remove));
        assert!(!running.contains(Action::Start));

        let paused = ActionSet::for_state(LifecycleState::Paused);
        assert_eq!(ActionSet::of(&[Action::Unpause, Action::Inspect]), paused);
    }

    #[test]
    fn unknown_state_only_allows_inspect() {
        let unknown = ActionSet::for_state(LifecycleState::Unknown);
        assert_eq!(vec![Action::Inspect], unknown.iter().collect::<Vec<_>>());
    }

    #[test]
    fn action_set_iterates_in_declaration_order() {
        let set = ActionSet::of(&[Action::Stats, Action::Start, Action::Logs]);
        assert_eq!(
            vec![Action::Start, Action::Logs, Action::Stats],
            set.iter().collect::<Vec<_>>()
        );
        assert!(set.without(Action::Logs).iter().all(|a| a != Action::Logs));
        assert!(ActionSet::empty().is_empty());
    }
}
