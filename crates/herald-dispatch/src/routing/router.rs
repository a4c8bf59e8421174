use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;

use herald_core::message::MessageKind;
use herald_core::types::TypeDescriptor;

use super::configuration::{BusTarget, DispatchConfiguration, DispatcherConfiguration};
use super::matcher::Specificity;

/// Routes matched for one message type, in configuration order.
#[derive(Debug, Clone)]
pub struct ResolvedRoutes {
    routes: Vec<DispatchConfiguration>,
}

impl ResolvedRoutes {
    pub fn routes(&self) -> &[DispatchConfiguration] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn is_security_critical(&self) -> bool {
        self.routes.iter().any(|r| r.is_security_critical())
    }

    /// Bus targets across all matched routes, each bus at most once. The
    /// first route naming a bus decides its error handler and serializer.
    pub fn bus_targets(&self) -> Vec<&BusTarget> {
        let mut out: Vec<&BusTarget> = Vec::new();
        for t in self.routes.iter().flat_map(|r| r.targets()) {
            if !out.iter().any(|seen| seen.key() == t.key()) {
                out.push(t);
            }
        }
        out
    }
}

/// Resolves a concrete message type to its routes.
///
/// Rules:
/// - exact routes first; generic routes only when no exact route matched;
/// - catch-all routes are added unless a matched route is exclusive;
/// - the outcome per (type, kind) is cached since the configuration is frozen.
pub struct TypeRouter {
    config: DispatcherConfiguration,
    cache: DashMap<(TypeId, MessageKind), Arc<[usize]>>,
}

impl TypeRouter {
    pub fn new(config: DispatcherConfiguration) -> Self {
        Self {
            config,
            cache: DashMap::new(),
        }
    }

    pub fn configuration(&self) -> &DispatcherConfiguration {
        &self.config
    }

    pub fn resolve(&self, kind: MessageKind, descriptor: &TypeDescriptor) -> ResolvedRoutes {
        let key = (descriptor.id(), kind);
        let cached = self.cache.get(&key).map(|hit| Arc::clone(hit.value()));
        let indexes = match cached {
            Some(hit) => hit,
            None => {
                let computed: Arc<[usize]> = Arc::from(self.compute(kind, descriptor));
                self.cache.insert(key, Arc::clone(&computed));
                computed
            }
        };

        let routes = self.config.routes();
        ResolvedRoutes {
            routes: indexes.iter().filter_map(|i| routes.get(*i).cloned()).collect(),
        }
    }

    fn compute(&self, kind: MessageKind, descriptor: &TypeDescriptor) -> Vec<usize> {
        let routes = self.config.routes();
        let matching = |spec: Specificity| -> Vec<usize> {
            routes
                .iter()
                .enumerate()
                .filter(|(_, r)| r.specificity() == spec && r.matches(kind, descriptor))
                .map(|(i, _)| i)
                .collect()
        };

        let mut specific = matching(Specificity::Exact);
        if specific.is_empty() && descriptor.generic_args().is_some() {
            specific = matching(Specificity::Generic);
        }

        let exclusive = specific
            .iter()
            .any(|i| routes.get(*i).is_some_and(|r| r.is_exclusive()));
        let mut selected = specific;
        if !exclusive {
            selected.extend(matching(Specificity::CatchAll));
        }
        selected.sort_unstable();

        if selected.is_empty() {
            tracing::debug!(message_type = %descriptor.name(), kind = kind.as_str(), "no route configured");
        }
        selected
    }
}
