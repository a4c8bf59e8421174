use crate::bus::BusKey;

/// What one dispatch call did. Every failure counted here was also logged.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub message_type: &'static str,
    pub delivered_buses: Vec<BusKey>,
    pub failed_buses: Vec<BusKey>,
    /// Buses a route named but no resolver or factory could provide.
    pub skipped_buses: Vec<BusKey>,
    pub handlers_invoked: usize,
    pub handler_failures: usize,
    pub callback_failures: usize,
}

impl DispatchReport {
    pub fn new(message_type: &'static str) -> Self {
        Self {
            message_type,
            ..Self::default()
        }
    }

    /// No bus, handler or callback failed. Skipped buses are routing misses,
    /// not failures.
    pub fn is_success(&self) -> bool {
        self.failed_buses.is_empty() && self.handler_failures == 0 && self.callback_failures == 0
    }
}
