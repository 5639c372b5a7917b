//! Slash commands for the chat REPL.

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub label: &'static str,
    pub description: &'static str,
}

const COMMAND_SPECS: &[CommandSpec] = &[
    CommandSpec {
        label: "q, quit",
        description: "Exit (an answer in progress is finished and saved first)",
    },
    CommandSpec {
        label: "stop",
        description: "Stop the answer being generated",
    },
    CommandSpec {
        label: "regen",
        description: "Regenerate the last answer",
    },
    CommandSpec {
        label: "regen!",
        description: "Regenerate, re-summarizing documents instead of using the cache",
    },
    CommandSpec {
        label: "new",
        description: "Start a new conversation",
    },
    CommandSpec {
        label: "open <id>",
        description: "Open an existing conversation",
    },
    CommandSpec {
        label: "kb [id,...]",
        description: "Set knowledge bases (no argument clears)",
    },
    CommandSpec {
        label: "docs [id,...]",
        description: "Set documents (no argument clears)",
    },
    CommandSpec {
        label: "web on|off",
        description: "Toggle web search",
    },
    CommandSpec {
        label: "history",
        description: "Print the conversation so far",
    },
    CommandSpec {
        label: "help",
        description: "Show available commands",
    },
];

#[must_use]
pub fn command_help() -> String {
    let width = COMMAND_SPECS
        .iter()
        .map(|spec| spec.label.len())
        .max()
        .unwrap_or(0);
    COMMAND_SPECS
        .iter()
        .map(|spec| format!("  /{:<width$}  {}", spec.label, spec.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A line of input.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Send(&'a str),
    Quit,
    Stop,
    Regenerate { bypass_cache: bool },
    New,
    Open(Option<&'a str>),
    KnowledgeBases(Vec<String>),
    Documents(Vec<String>),
    WebSearch(Option<bool>),
    History,
    Help,
    Unknown(&'a str),
    Empty,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let Some(raw) = line.strip_prefix('/') else {
            return if line.is_empty() {
                Command::Empty
            } else {
                Command::Send(line)
            };
        };

        let parts: Vec<&str> = raw.split_whitespace().collect();
        match parts.first().copied() {
            Some("q" | "quit" | "exit") => Command::Quit,
            Some("stop") => Command::Stop,
            Some("regen") => Command::Regenerate {
                bypass_cache: false,
            },
            Some("regen!") => Command::Regenerate { bypass_cache: true },
            Some("new") => Command::New,
            Some("open") => Command::Open(parts.get(1).copied()),
            Some("kb") => Command::KnowledgeBases(id_list(&parts[1..])),
            Some("docs") => Command::Documents(id_list(&parts[1..])),
            Some("web") => Command::WebSearch(match parts.get(1).copied() {
                Some("on" | "true" | "yes") => Some(true),
                Some("off" | "false" | "no") => Some(false),
                _ => None,
            }),
            Some("history") => Command::History,
            Some("help") => Command::Help,
            Some(cmd) => Command::Unknown(cmd),
            None => Command::Empty,
        }
    }
}

/// Ids separated by commas or whitespace.
fn id_list(parts: &[&str]) -> Vec<String> {
    parts
        .iter()
        .flat_map(|part| part.split(','))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
