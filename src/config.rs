//! Connection settings for a secret service client.

use std::env;

pub const DEFAULT_BUS_NAME: &str = "org.freedesktop.secrets";

/// Overrides the bus name the service is reached at; mostly useful for
/// pointing tests at a mock daemon.
pub const BUS_NAME_ENV: &str = "SECRET_SERVICE_BUS_NAME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bus_name: String,
    /// Handed to the service when showing prompts, so dialogs can be
    /// parented to the caller's window.
    pub window_id: String,
    /// Skip the encrypted session algorithm.
    pub prefer_plain: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let bus_name = env::var(BUS_NAME_ENV)
            .ok()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_BUS_NAME.to_string());
        Self {
            bus_name,
            window_id: String::new(),
            prefer_plain: false,
        }
    }

    pub fn with_bus_name(mut self, bus_name: impl Into<String>) -> Self {
        self.bus_name = bus_name.into();
        self
    }

    pub fn with_window_id(mut self, window_id: impl Into<String>) -> Self {
        self.window_id = window_id.into();
        self
    }

    pub fn with_plain_session(mut self, prefer_plain: bool) -> Self {
        self.prefer_plain = prefer_plain;
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
