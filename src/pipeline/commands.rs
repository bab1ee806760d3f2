//! Exposed Command Set
//!
//! Built once, when the pipeline is constructed: the client's own command list, plus the
//! allow list, minus the commands that cannot live inside a shared batch, minus the deny
//! list. Each surviving command is also exposed in its `Buffer` variant.

use super::options::PipelineOptions;

use std::collections::BTreeSet;

/// Commands that need a dedicated connection or would nest batching.
pub const NOT_ALLOWED_COMMANDS: &[&str] = &[
    "subscribe",
    "psubscribe",
    "unsubscribe",
    "punsubscribe",
    "unpsubscribe",
    "pipeline",
    "multi",
    "exec",
    "quit",
];

/// Suffix of the variant that replies with raw bytes.
pub const BUFFER_SUFFIX: &str = "Buffer";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSet {
    names: BTreeSet<String>,
}

impl CommandSet {
    pub fn build<I>(enumerated: I, options: &PipelineOptions) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let options = options.sanitized();
        let denied = |name: &str| {
            NOT_ALLOWED_COMMANDS.contains(&name) || options.deny_list.iter().any(|d| d == name)
        };

        let mut names = BTreeSet::new();
        for command in enumerated.into_iter().chain(options.allow_list.iter().cloned()) {
            if command.is_empty() || denied(&command) {
                continue;
            }
            let buffered = format!("{}{}", command, BUFFER_SUFFIX);
            if !denied(&buffered) {
                names.insert(buffered);
            }
            names.insert(command);
        }

        tracing::debug!("Exposing {} commands", names.len());
        Self { names }
    }

    pub fn contains(&self, command: &str) -> bool {
        self.names.contains(command)
    }

    /// Exposed names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
