use herald_core::message::AnyMessage;

/// Chooses the routing key a message is published with.
pub trait RoutingKeyFactory: Send + Sync {
    fn event_routing_key(&self, event: &AnyMessage) -> String;

    fn command_routing_key(&self, command: &AnyMessage) -> String;
}

/// Dotted type path: `orders::events::OrderPlaced` -> `orders.events.OrderPlaced`.
/// Generic arguments are kept as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRoutingKeyFactory;

impl DefaultRoutingKeyFactory {
    pub fn key_for(type_name: &str) -> String {
        type_name.replace("::", ".")
    }
}

impl RoutingKeyFactory for DefaultRoutingKeyFactory {
    fn event_routing_key(&self, event: &AnyMessage) -> String {
        Self::key_for(event.type_name())
    }

    fn command_routing_key(&self, command: &AnyMessage) -> String {
        Self::key_for(command.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_path_becomes_dotted_key() {
        assert_eq!(
            DefaultRoutingKeyFactory::key_for("orders::events::OrderPlaced"),
            "orders.events.OrderPlaced"
        );
        assert_eq!(DefaultRoutingKeyFactory::key_for("Plain"), "Plain");
    }
}
