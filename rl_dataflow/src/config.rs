//! Configuration for the experience queue and parameter server/client.
//!
//! Loading these from files or flags is left to the embedding process; the
//! structs derive serde so any loader can produce them.

use crate::error::{DataflowError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Experience queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceQueueConfig {
    /// Maximum number of batches outstanding before producers block.
    pub max_size: usize,
    /// Name of the dequeue worker thread.
    pub thread_name: String,
}

impl Default for ExperienceQueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            thread_name: "exp-dequeue".to_string(),
        }
    }
}

impl ExperienceQueueConfig {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue bound (in batches).
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the dequeue thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(DataflowError::Config("max_size must be > 0".into()));
        }
        Ok(())
    }
}

/// Parameter relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterServerConfig {
    /// Pub/sub topic carrying parameter broadcasts.
    pub topic: String,
    /// Number of request worker threads. More than one load-balances
    /// requests across workers.
    pub workers: usize,
}

impl Default for ParameterServerConfig {
    fn default() -> Self {
        Self {
            topic: "ps".to_string(),
            workers: 1,
        }
    }
}

impl ParameterServerConfig {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broadcast topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the number of request workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Whether requests are spread across several workers.
    pub fn load_balanced(&self) -> bool {
        self.workers > 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(DataflowError::Config("workers must be > 0".into()));
        }
        if self.topic.is_empty() {
            return Err(DataflowError::Config("topic must not be empty".into()));
        }
        Ok(())
    }
}

/// Parameter client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterClientConfig {
    /// How long to wait for a reply. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl ParameterClientConfig {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
