use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::mutation::MutationEvent;

/// Default indentation width of the persisted JSON.
pub const DEFAULT_SPACE: usize = 2;
/// Largest indentation accepted (matches `JSON.stringify`'s clamp).
pub const MAX_SPACE: usize = 10;
pub const DEFAULT_AUTO_SAVE_TIMEOUT: Duration = Duration::from_millis(750);
pub const DEFAULT_SAVING_RETRY_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_MAXIMUM_AUTO_SAVE_TIMEOUTS: u32 = 10;

/// Observer invoked once per completed flush with the triggering method name
/// and its result.
pub type OnUpdate = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// What a [`MutationHook`] wants done with an observed mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookAction {
    /// Hand the mutation to the scheduler as usual.
    Forward,
    /// Apply the mutation in memory but do not schedule a save for it.
    Suppress,
}

/// Advanced override of the interception behavior.
///
/// The hook sees every mutation before the scheduler does. Suppressing
/// mutations means they are only persisted by a later flush or an explicit
/// save, so most applications should not install one.
pub trait MutationHook: Send + Sync {
    fn on_mutation(&self, event: &MutationEvent) -> HookAction;
}

/// Options passed through to the file store backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOptions {
    /// Create missing parent directories before writing.
    pub create_dirs: bool,
    /// Write to a temporary sibling and rename it over the target.
    pub atomic: bool,
    /// `fsync` the file after every write.
    pub sync: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            create_dirs: true,
            atomic: true,
            sync: false,
        }
    }
}

/// Configuration for a VeloceDB database.
#[derive(Clone)]
pub struct VeloceConfig {
    /// Indentation width of the persisted JSON. `None` or `Some(0)` writes
    /// compact JSON.
    pub space: Option<usize>,
    /// Log every lifecycle event at `info` level with a timestamp.
    pub debug: bool,
    /// Persist automatically after mutations (proxy mode only).
    pub auto_save: bool,
    /// Hand out the raw document instead of an observed proxy. Every save
    /// must then be requested explicitly.
    pub no_proxy: bool,
    /// Quiet period after the last mutation before a flush.
    pub auto_save_timeout: Duration,
    /// Delay between attempts when a write fails.
    pub saving_retry_timeout: Duration,
    pub on_update: Option<OnUpdate>,
    /// Number of timer resets tolerated before a flush is forced.
    pub maximum_auto_save_timeouts: u32,
    pub file_options: FileOptions,
    pub handler: Option<Arc<dyn MutationHook>>,
    /// Initial document when the backing file does not exist yet.
    pub target: Option<Value>,
}

impl VeloceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_space(mut self, space: Option<usize>) -> Self {
        self.space = space;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_auto_save(mut self, auto_save: bool) -> Self {
        self.auto_save = auto_save;
        self
    }

    pub fn with_no_proxy(mut self, no_proxy: bool) -> Self {
        self.no_proxy = no_proxy;
        self
    }

    pub fn with_auto_save_timeout(mut self, timeout: Duration) -> Self {
        self.auto_save_timeout = timeout;
        self
    }

    pub fn with_saving_retry_timeout(mut self, timeout: Duration) -> Self {
        self.saving_retry_timeout = timeout;
        self
    }

    pub fn with_on_update<F>(mut self, on_update: F) -> Self
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.on_update = Some(Arc::new(on_update));
        self
    }

    pub fn with_maximum_auto_save_timeouts(mut self, maximum: u32) -> Self {
        self.maximum_auto_save_timeouts = maximum;
        self
    }

    pub fn with_file_options(mut self, file_options: FileOptions) -> Self {
        self.file_options = file_options;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn MutationHook>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_target(mut self, target: Value) -> Self {
        self.target = Some(target);
        self
    }

    /// Effective indentation: `None` means compact output.
    pub fn indent(&self) -> Option<usize> {
        self.space.filter(|space| *space > 0)
    }

    /// Whether mutations drive the debounce timer.
    pub fn auto_save_active(&self) -> bool {
        self.auto_save && !self.no_proxy
    }

    /// Check option values. Called when a database is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auto_save_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                option: "auto_save_timeout",
            });
        }
        if self.saving_retry_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                option: "saving_retry_timeout",
            });
        }
        if let Some(space) = self.space {
            if space > MAX_SPACE {
                return Err(ConfigError::SpaceTooLarge {
                    space,
                    max: MAX_SPACE,
                });
            }
        }
        Ok(())
    }
}

impl Default for VeloceConfig {
    fn default() -> Self {
        Self {
            space: Some(DEFAULT_SPACE),
            debug: false,
            auto_save: true,
            no_proxy: false,
            auto_save_timeout: DEFAULT_AUTO_SAVE_TIMEOUT,
            saving_retry_timeout: DEFAULT_SAVING_RETRY_TIMEOUT,
            on_update: None,
            maximum_auto_save_timeouts: DEFAULT_MAXIMUM_AUTO_SAVE_TIMEOUTS,
            file_options: FileOptions::default(),
            handler: None,
            target: None,
        }
    }
}

impl fmt::Debug for VeloceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VeloceConfig")
            .field("space", &self.space)
            .field("debug", &self.debug)
            .field("auto_save", &self.auto_save)
            .field("no_proxy", &self.no_proxy)
            .field("auto_save_timeout", &self.auto_save_timeout)
            .field("saving_retry_timeout", &self.saving_retry_timeout)
            .field("on_update", &self.on_update.is_some())
            .field("maximum_auto_save_timeouts", &self.maximum_auto_save_timeouts)
            .field("file_options", &self.file_options)
            .field("handler", &self.handler.is_some())
            .field("target", &self.target)
            .finish()
    }
}
