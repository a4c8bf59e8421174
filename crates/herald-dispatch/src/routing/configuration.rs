use std::fmt;
use std::sync::Arc;

use herald_core::error::HeraldError;
use herald_core::message::{AnyMessage, Command, DomainEvent, MessageKind};
use herald_core::serializer::Serializer;

use crate::bus::{Bus, BusKey};

use super::matcher::{Predicate, RouteMatcher, Specificity};

/// Invoked with the error of a failed bus publish.
pub type ErrorHandler = Arc<dyn Fn(&HeraldError, &AnyMessage) + Send + Sync>;

/// Direct constructor used when no resolver can provide the bus.
pub type BusFactory = Arc<dyn Fn() -> Arc<dyn Bus> + Send + Sync>;

/// One bus a route delivers to.
#[derive(Clone)]
pub struct BusTarget {
    key: BusKey,
    factory: Option<BusFactory>,
    error_handler: Option<ErrorHandler>,
    serializer: Option<Arc<dyn Serializer>>,
}

impl BusTarget {
    pub fn new(key: BusKey) -> Self {
        Self {
            key,
            factory: None,
            error_handler: None,
            serializer: None,
        }
    }

    /// Target the bus registered under `B`'s type name.
    pub fn of<B: Bus + 'static>() -> Self {
        Self::new(BusKey::of::<B>())
    }

    /// Like `of`, with a `Default` constructor as fallback.
    pub fn constructed<B: Bus + Default + 'static>() -> Self {
        Self::of::<B>().with_factory(Arc::new(|| Arc::new(B::default()) as Arc<dyn Bus>))
    }

    pub fn with_factory(mut self, factory: BusFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&HeraldError, &AnyMessage) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(f));
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn key(&self) -> &BusKey {
        &self.key
    }

    pub fn factory(&self) -> Option<&BusFactory> {
        self.factory.as_ref()
    }

    pub fn error_handler(&self) -> Option<&ErrorHandler> {
        self.error_handler.as_ref()
    }

    pub fn serializer(&self) -> Option<&Arc<dyn Serializer>> {
        self.serializer.as_ref()
    }
}

impl fmt::Debug for BusTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusTarget")
            .field("key", &self.key)
            .field("factory", &self.factory.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("serializer", &self.serializer.is_some())
            .finish()
    }
}

/// Frozen route: which messages, which buses, with what options.
#[derive(Clone)]
pub struct DispatchConfiguration {
    kind: MessageKind,
    matcher: RouteMatcher,
    predicate: Predicate,
    targets: Vec<BusTarget>,
    security_critical: bool,
    exclusive: bool,
}

impl DispatchConfiguration {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn matcher(&self) -> &RouteMatcher {
        &self.matcher
    }

    pub fn specificity(&self) -> Specificity {
        self.matcher.specificity()
    }

    pub fn targets(&self) -> &[BusTarget] {
        &self.targets
    }

    pub fn is_security_critical(&self) -> bool {
        self.security_critical
    }

    /// A matching exclusive route suppresses catch-all routes.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub(crate) fn matches(&self, kind: MessageKind, descriptor: &herald_core::TypeDescriptor) -> bool {
        self.kind == kind && (self.predicate)(descriptor)
    }
}

impl fmt::Debug for DispatchConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchConfiguration")
            .field("kind", &self.kind)
            .field("matcher", &self.matcher.to_string())
            .field("targets", &self.targets)
            .field("security_critical", &self.security_critical)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

/// Options collected for one route while building.
#[derive(Default)]
pub struct RouteBuilder {
    targets: Vec<BusTarget>,
    security_critical: bool,
    exclusive: bool,
}

impl RouteBuilder {
    /// Add a bus. A key already present in this route is ignored.
    pub fn to(mut self, target: BusTarget) -> Self {
        if !self.targets.iter().any(|t| t.key == target.key) {
            self.targets.push(target);
        }
        self
    }

    pub fn security_critical(mut self) -> Self {
        self.security_critical = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

#[derive(Default)]
pub struct DispatcherConfigurationBuilder {
    routes: Vec<DispatchConfiguration>,
}

impl DispatcherConfigurationBuilder {
    pub fn for_event<E: DomainEvent>(self, f: impl FnOnce(RouteBuilder) -> RouteBuilder) -> Self {
        self.route(MessageKind::Event, RouteMatcher::exact(&E::descriptor()), f)
    }

    pub fn for_command<C: Command>(self, f: impl FnOnce(RouteBuilder) -> RouteBuilder) -> Self {
        self.route(MessageKind::Command, RouteMatcher::exact(&C::descriptor()), f)
    }

    /// Every event instantiating `definition` with arguments satisfying
    /// `constraints` (one per type parameter).
    pub fn for_generic_events<I>(
        self,
        definition: &'static str,
        constraints: I,
        f: impl FnOnce(RouteBuilder) -> RouteBuilder,
    ) -> Self
    where
        I: IntoIterator<Item = Option<&'static str>>,
    {
        let matcher = RouteMatcher::OpenGeneric {
            definition,
            constraints: constraints.into_iter().collect(),
        };
        self.route(MessageKind::Event, matcher, f)
    }

    pub fn for_generic_commands<I>(
        self,
        definition: &'static str,
        constraints: I,
        f: impl FnOnce(RouteBuilder) -> RouteBuilder,
    ) -> Self
    where
        I: IntoIterator<Item = Option<&'static str>>,
    {
        let matcher = RouteMatcher::OpenGeneric {
            definition,
            constraints: constraints.into_iter().collect(),
        };
        self.route(MessageKind::Command, matcher, f)
    }

    pub fn for_all_events(self, f: impl FnOnce(RouteBuilder) -> RouteBuilder) -> Self {
        self.route(MessageKind::Event, RouteMatcher::All, f)
    }

    pub fn for_all_commands(self, f: impl FnOnce(RouteBuilder) -> RouteBuilder) -> Self {
        self.route(MessageKind::Command, RouteMatcher::All, f)
    }

    fn route(
        mut self,
        kind: MessageKind,
        matcher: RouteMatcher,
        f: impl FnOnce(RouteBuilder) -> RouteBuilder,
    ) -> Self {
        let built = f(RouteBuilder::default());
        self.routes.push(DispatchConfiguration {
            kind,
            predicate: matcher.compile(),
            matcher,
            targets: built.targets,
            security_critical: built.security_critical,
            exclusive: built.exclusive,
        });
        self
    }

    pub fn build(self) -> DispatcherConfiguration {
        DispatcherConfiguration {
            routes: Arc::from(self.routes),
        }
    }
}

/// Immutable set of routes.
#[derive(Clone, Debug)]
pub struct DispatcherConfiguration {
    routes: Arc<[DispatchConfiguration]>,
}

impl DispatcherConfiguration {
    pub fn builder() -> DispatcherConfigurationBuilder {
        DispatcherConfigurationBuilder::default()
    }

    /// Every event and every command to every given bus.
    pub fn route_all<I>(buses: I) -> Self
    where
        I: IntoIterator<Item = BusKey>,
    {
        let targets: Vec<BusTarget> = buses.into_iter().map(BusTarget::new).collect();
        let with_targets = |targets: Vec<BusTarget>| {
            move |r: RouteBuilder| targets.into_iter().fold(r, RouteBuilder::to)
        };
        Self::builder()
            .for_all_events(with_targets(targets.clone()))
            .for_all_commands(with_targets(targets))
            .build()
    }

    pub fn routes(&self) -> &[DispatchConfiguration] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rabbit;
    struct Memory;

    #[test]
    fn route_builder_deduplicates_bus_keys() {
        let r = RouteBuilder::default()
            .to(BusTarget::new(BusKey::of::<Rabbit>()))
            .to(BusTarget::new(BusKey::of::<Memory>()))
            .to(BusTarget::new(BusKey::of::<Rabbit>()));
        let keys: Vec<_> = r.targets.iter().map(|t| t.key().clone()).collect();
        assert_eq!(keys, vec![BusKey::of::<Rabbit>(), BusKey::of::<Memory>()]);
    }

    #[test]
    fn route_all_covers_both_kinds() {
        let cfg = DispatcherConfiguration::route_all([BusKey::named("a"), BusKey::named("b")]);
        assert_eq!(cfg.routes().len(), 2);
        for r in cfg.routes() {
            assert_eq!(r.specificity(), Specificity::CatchAll);
            assert_eq!(r.targets().len(), 2);
        }
        assert_eq!(cfg.routes()[0].kind(), MessageKind::Event);
        assert_eq!(cfg.routes()[1].kind(), MessageKind::Command);
    }
}
