use serde::Deserialize;
use herald_core::error::{HeraldError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeraldConfig {
    pub version: u32,

    #[serde(default)]
    pub dispatcher: DispatcherSettings,
}

impl HeraldConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(HeraldError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.dispatcher.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherSettings {
    /// Identity of this process on the wire. Transports built with
    /// `for_dispatcher` stamp it as the Envelope `Emiter`.
    #[serde(default = "default_service_id")]
    pub service_id: String,

    /// Default bound for `CommandAwaiter::wait_for_handlers`.
    #[serde(default = "default_handler_await_timeout_ms")]
    pub handler_await_timeout_ms: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            handler_await_timeout_ms: default_handler_await_timeout_ms(),
        }
    }
}

impl DispatcherSettings {
    pub fn validate(&self) -> Result<()> {
        if self.service_id.trim().is_empty() {
            return Err(HeraldError::Config(
                "dispatcher.service_id must not be empty".into(),
            ));
        }
        if !(1..=60000).contains(&self.handler_await_timeout_ms) {
            return Err(HeraldError::Config(
                "dispatcher.handler_await_timeout_ms must be between 1 and 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }
}

fn default_service_id() -> String {
    "herald".into()
}
fn default_handler_await_timeout_ms() -> u64 {
    1000
}
