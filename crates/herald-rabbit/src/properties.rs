use herald_core::envelope::Envelope;

use crate::broker::MessageProperties;

pub const CONTENT_TYPE: &str = "text/json";

/// Expiration sent when the envelope has none; effectively unbounded.
pub const NO_EXPIRATION_MS: u64 = i32::MAX as u64;

/// Properties for one envelope publish.
pub fn for_envelope(envelope: &Envelope) -> MessageProperties {
    MessageProperties {
        content_type: CONTENT_TYPE.to_string(),
        persistent: envelope.persistent_message,
        kind: envelope.data_type.clone(),
        expiration: envelope
            .expiration_ms()
            .unwrap_or(NO_EXPIRATION_MS)
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn persistent_envelope_with_expiration() {
        let env = Envelope::new("{}", "orders::OrderPlaced", "svc", true).with_expiration(Duration::from_secs(30));
        let p = for_envelope(&env);
        assert_eq!(p.content_type, "text/json");
        assert_eq!(p.delivery_mode(), 2);
        assert_eq!(p.kind, "orders::OrderPlaced");
        assert_eq!(p.expiration, "30000");
    }

    #[test]
    fn transient_envelope_without_expiration() {
        let p = for_envelope(&Envelope::new("{}", "a::B", "svc", false));
        assert_eq!(p.delivery_mode(), 1);
        assert_eq!(p.expiration, "2147483647");
    }
}
