//! Browser engine configuration.

use serde::{Deserialize, Serialize};

/// Settings for the rendered-page fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Navigation timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Quiet period with no new network requests before the page counts as
    /// idle, in milliseconds.
    #[serde(default = "default_idle_ms")]
    pub network_idle_ms: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Explicit Chrome executable. Searched for when unset.
    #[serde(default)]
    pub chrome_path: Option<String>,
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            timeout: default_timeout(),
            network_idle_ms: default_idle_ms(),
            chrome_args: Vec::new(),
            chrome_path: None,
        }
    }
}

pub fn default_headless() -> bool {
    true
}

pub fn default_timeout() -> u64 {
    30
}

pub fn default_idle_ms() -> u64 {
    500
}
