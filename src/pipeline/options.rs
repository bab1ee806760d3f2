use serde::{Deserialize, Serialize};

/// Construction-time configuration of the exposed command surface.
///
/// Unknown keys are ignored when deserializing. `whitelist` / `blacklist` are accepted as
/// aliases of `allow_list` / `deny_list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Extra command names to expose, e.g. server-side scripts the client defines itself.
    #[serde(alias = "whitelist")]
    pub allow_list: Vec<String>,
    /// Command names to hide.
    #[serde(alias = "blacklist")]
    pub deny_list: Vec<String>,
}

impl PipelineOptions {
    pub fn allow<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_list.extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn deny<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny_list.extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Drops empty names.
    pub fn sanitized(&self) -> Self {
        let clean = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        };
        Self {
            allow_list: clean(&self.allow_list),
            deny_list: clean(&self.deny_list),
        }
    }
}
