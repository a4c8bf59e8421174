//! The dispatcher: single entry point for originating events and commands.
//!
//! Per call:
//! 1. static callbacks, in registration order;
//! 2. local handlers (all of them for events, the first one for commands);
//! 3. every bus the routes resolve to, in configuration order. An
//!    in-memory bus over this dispatcher's own registry is skipped, so a
//!    local handler runs once per dispatch.
//!
//! Each callback, handler and bus is fault-isolated: a failure (or panic) is
//! logged, counted in the `DispatchReport`, and never stops its siblings.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;

use herald_core::error::{HeraldError, Result};
use herald_core::message::{AnyMessage, Command, DomainEvent, MessageKind};

use crate::bus::{Bus, BusResolver, InMemoryBus, PublishContext};
use crate::config::DispatcherSettings;
use crate::handlers::{CommandHandler, EventHandler, HandlerId, HandlerRegistration, HandlerRegistry, LiveHandler};
use crate::obs::DispatchMetrics;
use crate::routing::{BusTarget, DispatcherConfiguration, ResolvedRoutes, TypeRouter};

use super::awaiter::CommandAwaiter;
use super::report::DispatchReport;

type EventCallbackFn = Arc<dyn Fn(AnyMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type CommandCallbackFn = Arc<dyn Fn(&AnyMessage) -> Result<()> + Send + Sync>;

#[derive(Clone)]
struct Callback<F> {
    name: Arc<str>,
    declared_in: &'static str,
    f: F,
}

pub struct Dispatcher {
    settings: DispatcherSettings,
    resolver: Option<Arc<dyn BusResolver>>,
    router: OnceLock<TypeRouter>,
    handlers: Arc<HandlerRegistry>,
    event_callbacks: RwLock<Vec<Callback<EventCallbackFn>>>,
    command_callbacks: RwLock<Vec<Callback<CommandCallbackFn>>>,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    /// `configuration: None` installs "every message to every available bus"
    /// lazily, on the first dispatch, from the resolver's bus list.
    pub fn new(
        settings: DispatcherSettings,
        configuration: Option<DispatcherConfiguration>,
        resolver: Option<Arc<dyn BusResolver>>,
    ) -> Self {
        let router = OnceLock::new();
        if let Some(cfg) = configuration {
            let _ = router.set(TypeRouter::new(cfg));
        }
        Self {
            settings,
            resolver,
            router,
            handlers: HandlerRegistry::new(),
            event_callbacks: RwLock::new(Vec::new()),
            command_callbacks: RwLock::new(Vec::new()),
            metrics: Arc::new(DispatchMetrics::default()),
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.handlers)
    }

    /// Local delivery over this dispatcher's handlers (for transports).
    pub fn in_memory_bus(&self) -> InMemoryBus {
        InMemoryBus::new(self.handlers())
    }

    /// The active router; builds the default configuration on first use.
    pub fn router(&self) -> &TypeRouter {
        self.router.get_or_init(|| {
            let buses = self
                .resolver
                .as_ref()
                .map(|r| r.available())
                .unwrap_or_default();
            tracing::info!(
                buses = buses.len(),
                "no dispatcher configuration installed, routing every message to every available bus"
            );
            TypeRouter::new(DispatcherConfiguration::route_all(buses))
        })
    }

    // --------------------
    // Static subscribers
    // --------------------

    /// Register a callback run for every dispatched event, before any bus.
    pub fn on_event<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(AnyMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let cb = Callback {
            name: Arc::from(name.into()),
            declared_in: std::any::type_name::<F>(),
            f: Arc::new(move |m: AnyMessage| f(m).boxed()) as EventCallbackFn,
        };
        self.event_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cb);
    }

    /// Register a synchronous callback run for every dispatched command.
    pub fn on_command<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&AnyMessage) -> Result<()> + Send + Sync + 'static,
    {
        let cb = Callback {
            name: Arc::from(name.into()),
            declared_in: std::any::type_name::<F>(),
            f: Arc::new(f) as CommandCallbackFn,
        };
        self.command_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cb);
    }

    // --------------------
    // Local handlers
    // --------------------

    pub fn add_event_handler<E, H>(&self, handler: &Arc<H>) -> HandlerRegistration
    where
        E: DomainEvent,
        H: EventHandler<E>,
    {
        self.handlers.add_event_handler::<E, H>(handler)
    }

    pub fn add_command_handler<C, H>(&self, handler: &Arc<H>) -> HandlerRegistration
    where
        C: Command,
        H: CommandHandler<C>,
    {
        self.handlers.add_command_handler::<C, H>(handler)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.handlers.remove(id)
    }

    pub fn remove_handler_instance<H: ?Sized>(&self, handler: &Arc<H>) -> bool {
        self.handlers.remove_instance(handler)
    }

    // --------------------
    // Dispatch
    // --------------------

    pub async fn dispatch_event<E: DomainEvent>(&self, event: E) -> DispatchReport {
        self.run_event(AnyMessage::event(event)).await
    }

    /// Erased entry point. A command passed here is rejected before any
    /// callback, handler or bus runs.
    pub async fn dispatch_any_event(&self, event: AnyMessage) -> Result<DispatchReport> {
        if event.kind() != MessageKind::Event {
            return Err(HeraldError::InvalidArgument(format!(
                "{} is not an event",
                event.type_name()
            )));
        }
        Ok(self.run_event(event).await)
    }

    pub async fn dispatch_command<C: Command>(&self, command: C) -> CommandAwaiter {
        self.run_command(AnyMessage::command(command)).await
    }

    pub async fn dispatch_any_command(&self, command: AnyMessage) -> Result<CommandAwaiter> {
        if command.kind() != MessageKind::Command {
            return Err(HeraldError::InvalidArgument(format!(
                "{} is not a command",
                command.type_name()
            )));
        }
        Ok(self.run_command(command).await)
    }

    async fn run_event(&self, event: AnyMessage) -> DispatchReport {
        let started = Instant::now();
        let mut report = DispatchReport::new(event.type_name());

        let callbacks = self
            .event_callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for cb in &callbacks {
            let res = guarded((cb.f)(event.clone())).await;
            if let Err(e) = res {
                self.callback_failed(&cb.name, cb.declared_in, &event, &e);
                report.callback_failures += 1;
            }
        }

        let routes = self.router().resolve(MessageKind::Event, event.descriptor());

        let handlers = self.handlers.find_handlers_for(event.descriptor().id());
        report.handlers_invoked = handlers.len();
        let results = if routes.is_security_critical() {
            let mut out = Vec::with_capacity(handlers.len());
            for h in &handlers {
                out.push(guarded(h.invoke(&event)).await);
            }
            out
        } else {
            join_all(handlers.iter().map(|h| guarded(h.invoke(&event)))).await
        };
        for (h, res) in handlers.iter().zip(results) {
            if let Err(e) = res {
                tracing::error!(
                    handler_id = h.id().get(),
                    event_type = %event.type_name(),
                    error = %e,
                    "event handler failed"
                );
                self.metrics.handler_failures.inc(&[("kind", "event")]);
                report.handler_failures += 1;
            }
        }

        self.fan_out(&event, &routes, &mut report).await;

        self.metrics.dispatches.inc(&[("kind", "event")]);
        self.metrics
            .dispatch_duration
            .observe(&[("kind", "event")], started.elapsed());
        report
    }

    async fn run_command(&self, command: AnyMessage) -> CommandAwaiter {
        let started = Instant::now();
        let mut report = DispatchReport::new(command.type_name());

        let callbacks = self
            .command_callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for cb in &callbacks {
            let res = std::panic::catch_unwind(AssertUnwindSafe(|| (cb.f)(&command)))
                .unwrap_or_else(|p| Err(panicked(p)));
            if let Err(e) = res {
                self.callback_failed(&cb.name, cb.declared_in, &command, &e);
                report.callback_failures += 1;
            }
        }

        let routes = self.router().resolve(MessageKind::Command, command.descriptor());

        let mut tasks = Vec::new();
        match self.handlers.find_handler_for(command.descriptor().id()) {
            Some(handler) => {
                report.handlers_invoked = 1;
                tasks.push(self.spawn_command_handler(handler, command.clone()));
            }
            None => {
                tracing::debug!(command_type = %command.type_name(), "no local handler for command");
            }
        }

        self.fan_out(&command, &routes, &mut report).await;

        self.metrics.dispatches.inc(&[("kind", "command")]);
        self.metrics
            .dispatch_duration
            .observe(&[("kind", "command")], started.elapsed());

        let wait = Duration::from_millis(self.settings.handler_await_timeout_ms);
        CommandAwaiter::new(report, tasks, wait)
    }

    fn spawn_command_handler(&self, handler: LiveHandler, command: AnyMessage) -> tokio::task::JoinHandle<Result<()>> {
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let res = guarded(handler.invoke(&command)).await;
            if let Err(e) = &res {
                tracing::error!(
                    handler_id = handler.id().get(),
                    command_type = %command.type_name(),
                    error = %e,
                    "command handler failed"
                );
                metrics.handler_failures.inc(&[("kind", "command")]);
            }
            res
        })
    }

    /// Deliver to every routed bus, each at most once, each isolated.
    async fn fan_out(&self, message: &AnyMessage, routes: &ResolvedRoutes, report: &mut DispatchReport) {
        let kind = message.kind();

        for target in routes.bus_targets() {
            let key = target.key();
            let Some(bus) = self.resolve_bus(target) else {
                tracing::warn!(bus = %key, message_type = %message.type_name(), "bus could not be resolved, skipped");
                self.metrics.buses_skipped.inc(&[("bus", key.as_str())]);
                report.skipped_buses.push(key.clone());
                continue;
            };
            if bus.local_handlers().is_some_and(|r| Arc::ptr_eq(r, &self.handlers)) {
                tracing::debug!(bus = %key, message_type = %message.type_name(), "local bus already served by direct delivery");
                continue;
            }

            let ctx = PublishContext {
                serializer: target.serializer().cloned(),
            };
            let res = match kind {
                MessageKind::Event => guarded(bus.publish_event(message, &ctx)).await,
                MessageKind::Command => guarded(bus.dispatch_command(message, &ctx)).await,
            };

            match res {
                Ok(()) => {
                    self.metrics.bus_publishes.inc(&[("bus", key.as_str()), ("kind", kind.as_str())]);
                    report.delivered_buses.push(key.clone());
                }
                Err(e) => {
                    tracing::error!(
                        bus = %key,
                        message_type = %message.type_name(),
                        kind = kind.as_str(),
                        error = %e,
                        detail = ?e,
                        "bus dispatch failed"
                    );
                    self.metrics.bus_failures.inc(&[("bus", key.as_str()), ("kind", kind.as_str())]);
                    if let Some(on_error) = target.error_handler() {
                        if std::panic::catch_unwind(AssertUnwindSafe(|| on_error(&e, message))).is_err() {
                            tracing::error!(bus = %key, "bus error handler panicked");
                        }
                    }
                    report.failed_buses.push(key.clone());
                }
            }
        }
    }

    fn resolve_bus(&self, target: &BusTarget) -> Option<Arc<dyn Bus>> {
        self.resolver
            .as_ref()
            .and_then(|r| r.resolve(target.key()))
            .or_else(|| target.factory().map(|make| make()))
    }

    fn callback_failed(&self, name: &str, declared_in: &str, message: &AnyMessage, e: &HeraldError) {
        tracing::error!(
            callback = %name,
            declared_in = %declared_in,
            message_type = %message.type_name(),
            kind = message.kind().as_str(),
            error = %e,
            "dispatch callback failed"
        );
        self.metrics
            .callback_failures
            .inc(&[("kind", message.kind().as_str())]);
    }
}

/// Run a fallible future, turning a panic into an error.
async fn guarded<F>(fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|p| Err(panicked(p)))
}

fn panicked(payload: Box<dyn Any + Send>) -> HeraldError {
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    HeraldError::Internal(format!("panicked: {msg}"))
}
