//! Redis key layout.
//!
//! | key                         | type   |
//! |-----------------------------|--------|
//! | `{ns}queue:{channel}`        | list   |
//! | `{ns}job:{channel}:{video}`  | string |
//! | `{ns}active_jobs`            | set    |
//! | `{ns}channel_jobs:{channel}` | set    |

/// Builds and parses keys under one namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn queue_key(&self, channel: &str) -> String {
        format!("{}queue:{}", self.namespace, channel)
    }

    /// SCAN pattern matching every queue key.
    pub fn queue_pattern(&self) -> String {
        format!("{}queue:*", self.namespace)
    }

    pub fn job_key(&self, channel: &str, video: &str) -> String {
        format!("{}job:{}:{}", self.namespace, channel, video)
    }

    pub fn active_jobs_key(&self) -> String {
        format!("{}active_jobs", self.namespace)
    }

    pub fn channel_jobs_key(&self, channel: &str) -> String {
        format!("{}channel_jobs:{}", self.namespace, channel)
    }

    /// Channel id of a queue key, `None` for foreign keys.
    pub fn channel_from_queue_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.namespace.as_str())?
            .strip_prefix("queue:")
            .filter(|channel| !channel.is_empty())
    }

    /// Channel id of a job key. Channel ids are rejected at every entry
    /// point if they contain `:`, so the first separator ends the channel.
    pub fn channel_from_job_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        let (channel, _video) = key
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix("job:")?
            .split_once(':')?;
        Some(channel).filter(|c| !c.is_empty())
    }
}
