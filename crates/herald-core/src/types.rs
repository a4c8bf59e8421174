//! Runtime type descriptors used for routing.
//!
//! Rust has no runtime reflection, so every routable type describes itself once
//! through `Payload::descriptor()`. The descriptor carries the qualified type
//! name (the wire discriminator), the capability names the type satisfies
//! (interfaces or ancestors it can be assigned to), and, for instantiations of
//! a generic wrapper, the generic definition plus its type arguments.

use std::any::TypeId;

/// Generic instantiation info: `Notification<OrderPlaced>` is
/// `definition = "Notification"`, `arguments = [OrderPlaced]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericArgs {
    pub definition: &'static str,
    pub arguments: Vec<TypeDescriptor>,
}

/// Static type information for one concrete message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    id: TypeId,
    name: &'static str,
    implements: Vec<&'static str>,
    generic: Option<GenericArgs>,
}

impl TypeDescriptor {
    /// Descriptor for `T` with no capabilities and no generic info.
    pub fn of<T: 'static + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            implements: Vec::new(),
            generic: None,
        }
    }

    /// Declare capability names (interfaces, ancestors) this type is assignable to.
    pub fn implementing<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        for n in names {
            if !self.implements.contains(&n) {
                self.implements.push(n);
            }
        }
        self
    }

    /// Declare this type as an instantiation of the generic `definition`.
    pub fn generic<I>(mut self, definition: &'static str, arguments: I) -> Self
    where
        I: IntoIterator<Item = TypeDescriptor>,
    {
        self.generic = Some(GenericArgs {
            definition,
            arguments: arguments.into_iter().collect(),
        });
        self
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified name (`crate::module::Type<..>`).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the qualified name, generic arguments stripped.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }

    pub fn capabilities(&self) -> &[&'static str] {
        &self.implements
    }

    pub fn generic_args(&self) -> Option<&GenericArgs> {
        self.generic.as_ref()
    }

    /// Whether a value of this type can be used where `capability` is required:
    /// the capability is this type itself (by short or qualified name) or one
    /// of its declared interfaces/ancestors.
    pub fn is_assignable_to(&self, capability: &str) -> bool {
        self.name == capability
            || self.short_name() == capability
            || self.implements.iter().any(|c| *c == capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    struct Wrapper<T>(T);

    #[test]
    fn short_name_strips_path_and_generics() {
        let d = TypeDescriptor::of::<Wrapper<Plain>>();
        assert_eq!(d.short_name(), "Wrapper");
        assert_eq!(TypeDescriptor::of::<Plain>().short_name(), "Plain");
    }

    #[test]
    fn assignability_uses_declared_capabilities() {
        let d = TypeDescriptor::of::<Plain>().implementing(["IFoo", "Base"]);
        assert!(d.is_assignable_to("IFoo"));
        assert!(d.is_assignable_to("Base"));
        assert!(d.is_assignable_to("Plain"));
        assert!(!d.is_assignable_to("IBar"));
    }

    #[test]
    fn implementing_deduplicates() {
        let d = TypeDescriptor::of::<Plain>().implementing(["IFoo", "IFoo"]);
        assert_eq!(d.capabilities(), &["IFoo"]);
    }
}
