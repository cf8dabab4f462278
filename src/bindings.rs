use crate::lifecycle::Action;

pub struct ActionBinding {
    pub matchers: Vec<VerbMatch>,
    pub label: &'static str,
    pub action: Action,
}

pub enum VerbMatch {
    Exact(&'static str),
    MatchFn(fn(&str) -> bool),
}

pub fn matches_verb(verb: &str, matcher: &VerbMatch) -> bool {
    match matcher {
        VerbMatch::Exact(v) => verb.eq_ignore_ascii_case(v),
        VerbMatch::MatchFn(f) => f(&verb.to_ascii_lowercase()),
    }
}

pub fn default_bindings() -> Vec<ActionBinding> {
    vec![
        ActionBinding {
            matchers: vec![VerbMatch::Exact("start")],
            label: "Start",
            action: Action::Start,
        },
        ActionBinding {
            matchers: vec![VerbMatch::Exact("stop")],
            label: "Stop",
            action: Action::Stop,
        },
        ActionBinding {
            matchers: vec![VerbMatch::Exact("restart")],
            label: "Restart",
            action: Action::Restart,
        },
        ActionBinding {
            matchers: vec![VerbMatch::Exact("pause")],
            label: "Pause",
            action: Action::Pause,
        },
        ActionBinding {
            matchers: vec![VerbMatch::Exact("unpause"), VerbMatch::Exact("resume")],
            label: "Unpause",
            action: Action::Unpause,
        },
        ActionBinding {
            matchers: vec![
                VerbMatch::Exact("rm"),
                VerbMatch::Exact("remove"),
                VerbMatch::Exact("delete"),
            ],
            label: "Remove",
            action: Action::Remove,
        },
        ActionBinding {
            matchers: vec![VerbMatch::Exact("logs"), VerbMatch::Exact("log")],
            label: "Show Logs",
            action: Action::Logs,
        },
        ActionBinding {
            matchers: vec![VerbMatch::Exact("top")],
            label: "Watch Top",
            action: Action::Top,
        },
        ActionBinding {
            matchers: vec![
                VerbMatch::Exact("shell"),
                VerbMatch::Exact("sh"),
                VerbMatch::Exact("exec"),
            ],
            label: "Open Shell",
            action: Action::Shell,
        },
        ActionBinding {
            matchers: vec![
                VerbMatch::Exact("stats"),
                VerbMatch::MatchFn(|v| v.len() >= 4 && "statistics".starts_with(v)),
            ],
            label: "Watch Statistics",
            action: Action::Stats,
        },
        ActionBinding {
            matchers: vec![
                VerbMatch::Exact("inspect"),
                VerbMatch::MatchFn(|v| matches!(v, "details" | "info" | "ip")),
            ],
            label: "Inspect",
            action: Action::Inspect,
        },
    ]
}

/// Resolves a user-typed verb such as `rm` or `Stats` to its action.
pub fn find_action(verb: &str) -> Option<Action> {
    default_bindings()
        .into_iter()
        .find(|binding| binding.matchers.iter().any(|m| matches_verb(verb, m)))
        .map(|binding| binding.action)
}

pub fn label(action: Action) -> &'static str {
    default_bindings()
        .into_iter()
        .find(|binding| binding.action == action)
        .map(|binding| binding.label)
        .unwrap_or_else(|| action.as_str())
}
