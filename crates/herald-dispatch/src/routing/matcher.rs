use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use herald_core::types::TypeDescriptor;

/// How a route selects message types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatcher {
    /// Exactly one concrete type.
    Exact { id: TypeId, name: &'static str },
    /// Any instantiation of `definition` whose type arguments satisfy the
    /// per-position constraint (`None` = unconstrained).
    OpenGeneric {
        definition: &'static str,
        constraints: Vec<Option<&'static str>>,
    },
    /// Every message of the configuration's kind.
    All,
}

/// Precedence class of a matcher. Exact routes shadow generic ones; catch-all
/// routes are additive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specificity {
    Exact,
    Generic,
    CatchAll,
}

pub(crate) type Predicate = Arc<dyn Fn(&TypeDescriptor) -> bool + Send + Sync>;

impl RouteMatcher {
    pub fn exact(descriptor: &TypeDescriptor) -> Self {
        RouteMatcher::Exact {
            id: descriptor.id(),
            name: descriptor.name(),
        }
    }

    pub fn specificity(&self) -> Specificity {
        match self {
            RouteMatcher::Exact { .. } => Specificity::Exact,
            RouteMatcher::OpenGeneric { .. } => Specificity::Generic,
            RouteMatcher::All => Specificity::CatchAll,
        }
    }

    /// Compile into a predicate evaluated on the hot path.
    pub(crate) fn compile(&self) -> Predicate {
        match self.clone() {
            RouteMatcher::Exact { id, .. } => Arc::new(move |d: &TypeDescriptor| d.id() == id),
            RouteMatcher::OpenGeneric {
                definition,
                constraints,
            } => Arc::new(move |d: &TypeDescriptor| {
                let Some(g) = d.generic_args() else {
                    return false;
                };
                g.definition == definition
                    && g.arguments.len() == constraints.len()
                    && g.arguments.iter().zip(constraints.iter()).all(|(arg, c)| match c {
                        Some(capability) => arg.is_assignable_to(capability),
                        None => true,
                    })
            }),
            RouteMatcher::All => Arc::new(|_: &TypeDescriptor| true),
        }
    }
}

impl fmt::Display for RouteMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMatcher::Exact { name, .. } => f.write_str(name),
            RouteMatcher::OpenGeneric {
                definition,
                constraints,
            } => {
                let args: Vec<&str> = constraints.iter().map(|c| c.unwrap_or("_")).collect();
                write!(f, "{definition}<{}>", args.join(", "))
            }
            RouteMatcher::All => f.write_str("*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Notification<T>(T);
    struct ConcreteFoo;
    struct Unrelated;

    fn notification_of(arg: TypeDescriptor) -> TypeDescriptor {
        TypeDescriptor::of::<Notification<()>>().generic("Notification", [arg])
    }

    #[test]
    fn open_generic_checks_argument_capability() {
        let m = RouteMatcher::OpenGeneric {
            definition: "Notification",
            constraints: vec![Some("IFoo")],
        }
        .compile();

        let foo = notification_of(TypeDescriptor::of::<ConcreteFoo>().implementing(["IFoo"]));
        let other = notification_of(TypeDescriptor::of::<Unrelated>());
        assert!(m(&foo));
        assert!(!m(&other));
        assert!(!m(&TypeDescriptor::of::<ConcreteFoo>()));
    }

    #[test]
    fn open_generic_requires_same_definition_and_arity() {
        let m = RouteMatcher::OpenGeneric {
            definition: "Envelope",
            constraints: vec![None],
        }
        .compile();
        assert!(!m(&notification_of(TypeDescriptor::of::<ConcreteFoo>())));

        let two = RouteMatcher::OpenGeneric {
            definition: "Notification",
            constraints: vec![None, None],
        }
        .compile();
        assert!(!two(&notification_of(TypeDescriptor::of::<ConcreteFoo>())));
    }

    #[test]
    fn display_is_readable() {
        let m = RouteMatcher::OpenGeneric {
            definition: "Notification",
            constraints: vec![Some("IFoo"), None],
        };
        assert_eq!(m.to_string(), "Notification<IFoo, _>");
    }
}
