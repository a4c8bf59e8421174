//! Type routing: which buses receive a dispatched event or command.
//!
//! Routes are declared once through `DispatcherConfiguration::builder()`,
//! compiled into predicates, and frozen. The router only evaluates those
//! predicates (and caches the outcome per type) on the hot path.

mod configuration;
mod matcher;
mod router;

pub use configuration::{
    BusFactory, BusTarget, DispatchConfiguration, DispatcherConfiguration,
    DispatcherConfigurationBuilder, ErrorHandler, RouteBuilder,
};
pub use matcher::{RouteMatcher, Specificity};
pub use router::{ResolvedRoutes, TypeRouter};
