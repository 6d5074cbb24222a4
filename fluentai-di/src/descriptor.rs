//! Type descriptors and realized values
//!
//! Rust has no implicit subtyping, so a descriptor lists every type its
//! composer is assignable to: the produced type itself plus any supertypes
//! (usually trait objects) declared at registration. Each entry carries a
//! projection from the erased instance to an `Arc` of that type which keeps
//! the same allocation, so reference identity survives upcasting.

use crate::error::{DiError, DiResult};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Type-erased realized value; always holds the produced `T` directly
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A boxed `Arc<U>` for some requested type `U`
type View = Box<dyn Any>;

type Projection = Arc<dyn Fn(&Instance) -> Option<View> + Send + Sync>;

/// Identifies a type by its `TypeId`, keeping the name for messages
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeKey {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Clone)]
struct TypeView {
    key: TypeKey,
    project: Projection,
}

/// Describes the produced type of a composer and the types it satisfies
#[derive(Clone)]
pub struct TypeDescriptor {
    /// First entry is always the produced type
    views: Vec<TypeView>,
}

impl TypeDescriptor {
    /// Descriptor for a composer producing `T`
    pub fn of<T: Send + Sync + 'static>() -> Self {
        let project: Projection = Arc::new(|instance: &Instance| {
            let concrete = Arc::clone(instance).downcast::<T>().ok()?;
            Some(Box::new(concrete) as View)
        });
        TypeDescriptor {
            views: vec![TypeView {
                key: TypeKey::of::<T>(),
                project,
            }],
        }
    }

    /// Declare that values produced as `T` also satisfy requests for `U`
    ///
    /// Declaring a type twice keeps the first projection.
    pub fn with_supertype<T, U, F>(mut self, upcast: F) -> Self
    where
        T: Send + Sync + 'static,
        U: ?Sized + 'static,
        F: Fn(Arc<T>) -> Arc<U> + Send + Sync + 'static,
    {
        let key = TypeKey::of::<U>();
        if self.is_assignable_to(&key) {
            return self;
        }
        let project: Projection = Arc::new(move |instance: &Instance| {
            let concrete = Arc::clone(instance).downcast::<T>().ok()?;
            Some(Box::new(upcast(concrete)) as View)
        });
        self.views.push(TypeView { key, project });
        self
    }

    pub fn produced(&self) -> TypeKey {
        self.views[0].key
    }

    /// Whether a request for `key` can be satisfied by this descriptor
    pub fn is_assignable_to(&self, key: &TypeKey) -> bool {
        self.views.iter().any(|view| view.key == *key)
    }

    /// Every type this descriptor satisfies, produced type first
    pub fn assignable_types(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.views.iter().map(|view| view.key)
    }

    fn project(&self, instance: &Instance, key: &TypeKey) -> Option<View> {
        self.views
            .iter()
            .find(|view| view.key == *key)
            .and_then(|view| (view.project)(instance))
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.assignable_types()).finish()
    }
}

/// A realized instance bound to its composer id and type descriptor
#[derive(Clone)]
pub struct Concrete {
    id: Arc<str>,
    instance: Instance,
    descriptor: Arc<TypeDescriptor>,
}

impl Concrete {
    pub(crate) fn new(id: Arc<str>, instance: Instance, descriptor: Arc<TypeDescriptor>) -> Self {
        Self {
            id,
            instance,
            descriptor,
        }
    }

    /// Id of the composer that built this value
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Whether both values share the same allocation
    pub fn ptr_eq(&self, other: &Concrete) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }

    /// View the value as `T`, which may be the produced type or any
    /// declared supertype
    pub fn downcast<T: ?Sized + 'static>(&self) -> DiResult<Arc<T>> {
        let key = TypeKey::of::<T>();
        let mismatch = || DiError::TypeMismatch {
            expected: key.name().to_string(),
            actual: self.descriptor.produced().name().to_string(),
        };
        let view = self
            .descriptor
            .project(&self.instance, &key)
            .ok_or_else(mismatch)?;
        view.downcast::<Arc<T>>()
            .map(|value| *value)
            .map_err(|_| mismatch())
    }
}

impl fmt::Debug for Concrete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Concrete")
            .field("id", &self.id)
            .field("type", &self.descriptor.produced())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    fn concrete<T: Send + Sync + 'static>(value: T, descriptor: TypeDescriptor) -> Concrete {
        Concrete::new(Arc::from("test"), Arc::new(value), Arc::new(descriptor))
    }

    #[test]
    fn test_type_key_equality_ignores_name_formatting() {
        assert_eq!(TypeKey::of::<String>(), TypeKey::of::<String>());
        assert_ne!(TypeKey::of::<String>(), TypeKey::of::<str>());
        assert_eq!(TypeKey::of::<i32>().name(), "i32");
    }

    #[test]
    fn test_descriptor_assignability() {
        let descriptor = TypeDescriptor::of::<English>()
            .with_supertype::<English, dyn Greeter, _>(|english| english as Arc<dyn Greeter>);

        assert_eq!(descriptor.produced(), TypeKey::of::<English>());
        assert!(descriptor.is_assignable_to(&TypeKey::of::<English>()));
        assert!(descriptor.is_assignable_to(&TypeKey::of::<dyn Greeter>()));
        assert!(!descriptor.is_assignable_to(&TypeKey::of::<String>()));
    }

    #[test]
    fn test_upcast_keeps_allocation() {
        let descriptor = TypeDescriptor::of::<English>()
            .with_supertype::<English, dyn Greeter, _>(|english| english as Arc<dyn Greeter>);
        let value = concrete(English, descriptor);

        let as_english = value.downcast::<English>().unwrap();
        let as_greeter = value.downcast::<dyn Greeter>().unwrap();

        assert_eq!(as_greeter.greet(), "hello");
        assert_eq!(
            Arc::as_ptr(&as_english) as *const u8,
            Arc::as_ptr(&as_greeter) as *const u8
        );
    }

    #[test]
    fn test_downcast_to_undeclared_type_fails() {
        let value = concrete(10_i32, TypeDescriptor::of::<i32>());

        assert_eq!(*value.downcast::<i32>().unwrap(), 10);
        assert!(matches!(
            value.downcast::<i64>(),
            Err(DiError::TypeMismatch { .. })
        ));
    }
}
