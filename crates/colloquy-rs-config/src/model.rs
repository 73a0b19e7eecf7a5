//! Configuration schema for Colloquy.

use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Re-export protocol roles (used for context selection).
pub use colloquy_rs_protocol::Role;

/// Directory under the home directory holding Colloquy data and config.
pub const DEFAULT_DATA_DIR: &str = ".colloquy";
/// Placeholder substituted with the raw user text inside prompt templates.
pub const DEFAULT_PLACEHOLDER: &str = "$ARGUMENTS";

/// Root config for Colloquy.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ColloquyConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl ColloquyConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> ColloquyConfigBuilder {
        ColloquyConfigBuilder::new()
    }
}

/// Builder for assembling a `ColloquyConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct ColloquyConfigBuilder {
    config: ColloquyConfig,
}

impl ColloquyConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: ColloquyConfig::default(),
        }
    }

    /// Replace the storage configuration.
    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    /// Point storage at an explicit root directory.
    pub fn storage_path(mut self, path: impl Into<String>) -> Self {
        self.config.storage.path = Some(path.into());
        self
    }

    /// Replace the context window configuration.
    pub fn context(mut self, context: ContextConfig) -> Self {
        self.config.context = context;
        self
    }

    /// Set how many prior messages feed a generation.
    pub fn window_size(mut self, window_size: usize) -> Self {
        self.config.context.window_size = window_size;
        self
    }

    /// Replace the prompt template configuration.
    pub fn commands(mut self, commands: CommandsConfig) -> Self {
        self.config.commands = commands;
        self
    }

    /// Replace the notification bus configuration.
    pub fn events(mut self, events: EventsConfig) -> Self {
        self.config.events = events;
        self
    }

    /// Finalize and return the built `ColloquyConfig`.
    pub fn build(self) -> ColloquyConfig {
        self.config
    }
}

/// Where conversation logs and the thread registry live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Storage root; defaults to `~/.colloquy`.
    #[serde(default)]
    pub path: Option<String>,
    /// Directory under the root holding one log per thread.
    #[serde(default = "default_conversations_dir")]
    pub conversations_dir: String,
    /// Registry file under the root.
    #[serde(default = "default_threads_file")]
    pub threads_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            conversations_dir: default_conversations_dir(),
            threads_file: default_threads_file(),
        }
    }
}

impl StorageConfig {
    /// Resolve the storage root. Absolute paths are kept, relative paths
    /// resolve against `cwd`, and a missing path falls back to the home
    /// directory (or `<cwd>/.colloquy` when no home is known).
    pub fn resolve_root(&self, cwd: &Path) -> PathBuf {
        match self.path.as_deref() {
            Some(path) => {
                let path = expand_home(path);
                if path.is_absolute() {
                    path
                } else {
                    cwd.join(path)
                }
            }
            None => UserDirs::new()
                .map(|dirs| dirs.home_dir().join(DEFAULT_DATA_DIR))
                .unwrap_or_else(|| cwd.join(DEFAULT_DATA_DIR)),
        }
    }

    /// Directory holding per-thread logs under a resolved root.
    pub fn conversations_path(&self, root: &Path) -> PathBuf {
        root.join(&self.conversations_dir)
    }

    /// Thread registry file under a resolved root.
    pub fn threads_path(&self, root: &Path) -> PathBuf {
        root.join(&self.threads_file)
    }
}

fn default_conversations_dir() -> String {
    "conversations".to_string()
}

fn default_threads_file() -> String {
    "threads.jsonl".to_string()
}

/// Expand a leading `~/` to the home directory when one is known.
fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(dirs) = UserDirs::new() {
            let rest = path.trim_start_matches('~').trim_start_matches('/');
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

/// Context window selection for generation input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextConfig {
    /// Number of prior messages included before the new user turn.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Roles eligible for the context window.
    #[serde(default = "default_context_roles")]
    pub roles: Vec<Role>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            roles: default_context_roles(),
        }
    }
}

fn default_window_size() -> usize {
    5
}

fn default_context_roles() -> Vec<Role> {
    Role::ALL.to_vec()
}

/// Prompt template (command) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandsConfig {
    /// Directory of `<id>.md` templates; defaults to `<storage root>/commands`.
    #[serde(default)]
    pub path: Option<String>,
    /// Token replaced with the raw user text.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            path: None,
            placeholder: default_placeholder(),
        }
    }
}

impl CommandsConfig {
    /// Resolve the template directory against the storage root.
    pub fn resolve_dir(&self, root: &Path) -> PathBuf {
        match self.path.as_deref() {
            Some(path) => {
                let path = expand_home(path);
                if path.is_absolute() {
                    path
                } else {
                    root.join(path)
                }
            }
            None => root.join("commands"),
        }
    }
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

/// Notification bus sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventsConfig {
    /// Per-subscriber broadcast buffer; slower subscribers lose events.
    #[serde(default = "default_event_buffer")]
    pub buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer: default_event_buffer(),
        }
    }
}

fn default_event_buffer() -> usize {
    512
}
