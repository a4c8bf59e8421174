//! Top-level facade crate for Herald.
//!
//! Re-exports the core types, the dispatcher and the RabbitMQ transport so
//! users can depend on a single crate.

pub mod core {
    pub use herald_core::*;
}

pub mod dispatch {
    pub use herald_dispatch::*;
}

pub mod rabbit {
    pub use herald_rabbit::*;
}

pub use herald_core::{AnyMessage, Command, DomainEvent, Envelope, HeraldError, Payload, Result};
pub use herald_dispatch::{CommandHandler, Dispatcher, EventHandler};
