//! Auto-wiring from compile-time constructor tables
//!
//! A type opts in by implementing [`AutoCompose`], normally through the
//! [`auto_compose!`](crate::auto_compose) macro, which records the ordered
//! parameter types of its constructor. The generated factory resolves each
//! parameter through the resolver it is given, in declaration order.

use crate::descriptor::{Concrete, TypeKey};
use crate::error::{DiError, DiResult};
use crate::resolver::Resolver;
use std::sync::Arc;
use tracing::trace;

/// One constructor parameter: its name and, when known, its type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    name: &'static str,
    ty: Option<TypeKey>,
}

impl Parameter {
    pub fn typed<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self {
            name,
            ty: Some(TypeKey::of::<T>()),
        }
    }

    /// A parameter without type information; resolving it always fails
    pub fn untyped(name: &'static str) -> Self {
        Self { name, ty: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_key(&self) -> Option<TypeKey> {
        self.ty
    }
}

/// Types that can be built by resolving their constructor parameters
pub trait AutoCompose: Sized + Send + Sync + 'static {
    /// Ordered constructor table
    fn parameters() -> Vec<Parameter>;

    /// Build the value from arguments resolved in table order
    fn construct(arguments: Arguments) -> DiResult<Self>;
}

/// Resolved constructor arguments, consumed in table order
pub struct Arguments {
    owner: &'static str,
    values: std::vec::IntoIter<Concrete>,
}

impl Arguments {
    /// Take the next argument as `T`
    pub fn take<T: ?Sized + 'static>(&mut self) -> DiResult<Arc<T>> {
        match self.values.next() {
            Some(value) => value.downcast::<T>(),
            None => Err(DiError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                actual: format!("no remaining argument for {}", self.owner),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.len() == 0
    }
}

/// Resolve every parameter of `T` and construct it
pub(crate) fn compose<T: AutoCompose>(resolver: &Resolver) -> DiResult<T> {
    let owner = std::any::type_name::<T>();
    let mut values = Vec::new();
    for parameter in T::parameters() {
        let key = parameter.type_key().ok_or_else(|| DiError::UntypedDependency {
            type_name: owner.to_string(),
            parameter: parameter.name().to_string(),
        })?;
        trace!("Auto-wiring {}.{}: {}", owner, parameter.name(), key);
        values.push(resolver.resolve_erased(&key, None)?);
    }

    T::construct(Arguments {
        owner,
        values: values.into_iter(),
    })
}

/// Implement [`AutoCompose`] for a struct whose fields are `Arc`s of
/// resolvable types
///
/// ```
/// use fluentai_di::auto_compose;
/// use std::sync::Arc;
///
/// struct Point { x: i32 }
/// struct PointWrapper { point: Arc<Point> }
///
/// auto_compose!(PointWrapper { point: Point });
/// ```
#[macro_export]
macro_rules! auto_compose {
    ($ty:ty { $($field:ident : $dep:ty),* $(,)? }) => {
        impl $crate::autowire::AutoCompose for $ty {
            fn parameters() -> ::std::vec::Vec<$crate::autowire::Parameter> {
                ::std::vec![$($crate::autowire::Parameter::typed::<$dep>(stringify!($field))),*]
            }

            #[allow(unused_mut, unused_variables)]
            fn construct(
                mut arguments: $crate::autowire::Arguments,
            ) -> $crate::error::DiResult<Self> {
                Ok(Self {
                    $($field: arguments.take::<$dep>()?),*
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auto_compose, Composer, ScopeRegistry};

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    struct PointWrapper {
        point: Arc<Point>,
    }

    struct EmptyInit;

    struct Untyped;

    auto_compose!(PointWrapper { point: Point });
    auto_compose!(EmptyInit {});

    impl AutoCompose for Untyped {
        fn parameters() -> Vec<Parameter> {
            vec![Parameter::untyped("mystery")]
        }

        fn construct(_arguments: Arguments) -> DiResult<Self> {
            Ok(Untyped)
        }
    }

    #[test]
    fn test_generated_table() {
        let parameters = PointWrapper::parameters();
        assert_eq!(parameters, vec![Parameter::typed::<Point>("point")]);
        assert!(EmptyInit::parameters().is_empty());
    }

    #[test]
    fn test_compose_resolves_parameters() {
        let registry = ScopeRegistry::new();
        registry
            .register(Composer::builder::<Point>().supplier(|| Point { x: 1, y: 2 }).unwrap())
            .unwrap();
        registry
            .register(Composer::builder::<PointWrapper>().autowired().unwrap())
            .unwrap();

        let wrapper = registry.root_resolver().resolve::<PointWrapper>().unwrap();
        assert_eq!(*wrapper.point, Point { x: 1, y: 2 });
    }

    #[test]
    fn test_untyped_parameter_fails_when_factory_runs() {
        let registry = ScopeRegistry::new();
        // registration itself succeeds
        registry
            .register(Composer::builder::<Untyped>().autowired().unwrap())
            .unwrap();

        let result = registry.root_resolver().resolve::<Untyped>();
        assert!(matches!(
            result,
            Err(DiError::UntypedDependency { parameter, .. }) if parameter == "mystery"
        ));
    }

    #[test]
    fn test_take_past_end() {
        let mut arguments = Arguments {
            owner: "Test",
            values: Vec::new().into_iter(),
        };
        assert!(arguments.is_empty());
        assert!(matches!(
            arguments.take::<i32>(),
            Err(DiError::TypeMismatch { .. })
        ));
    }
}
