//! Typed controller methods behind a uniform call interface.
//!
//! Any `Fn(&C, A1, .., An) -> Result<R, E>` with up to eight arguments is a
//! [`Handler`], as long as every `Ai` is a [`Parameter`], `R` is a [`Reply`]
//! and `E` converts into [`ActionError`]. The argument types are what the
//! builder inspects instead of runtime reflection; the bound values reach
//! the handler as [`Arguments`] and are downcast back in declaration order.

use std::any::type_name;
use std::vec;

use crate::error::ActionError;
use crate::mapping::{BoxedValue, Parameter, ParameterType, Reply, ReturnType};

/// Bound argument values, consumed front to back.
pub struct Arguments {
    values: vec::IntoIter<BoxedValue>,
}

impl Arguments {
    pub(crate) fn new(values: Vec<BoxedValue>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    /// Takes the next argument as a `T`.
    ///
    /// A missing or mistyped value means a binder disagreed with the handler
    /// signature; that is an internal error.
    pub fn take<T: 'static>(&mut self) -> Result<T, ActionError> {
        let value = self.values.next().ok_or_else(|| {
            ActionError::internal(format!("missing handler argument of type {}", type_name::<T>()))
        })?;
        value.downcast::<T>().map(|value| *value).map_err(|_| {
            ActionError::internal(format!("handler argument is not a {}", type_name::<T>()))
        })
    }
}

/// A controller method callable with bound [`Arguments`].
///
/// `Args` is a tuple of the argument types; it only exists to keep the
/// implementations for different arities apart.
pub trait Handler<C, Args>: Send + Sync + 'static {
    /// One description per argument, in declaration order.
    fn parameter_types() -> Vec<ParameterType>;

    fn return_type() -> ReturnType;

    fn call(&self, controller: &C, args: Arguments) -> Result<BoxedValue, ActionError>;
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<C, F, R, E, $($arg,)*> Handler<C, ($($arg,)*)> for F
        where
            F: Fn(&C, $($arg),*) -> Result<R, E> + Send + Sync + 'static,
            R: Reply,
            E: Into<ActionError>,
            $($arg: Parameter,)*
        {
            fn parameter_types() -> Vec<ParameterType> {
                vec![$(<$arg as Parameter>::parameter_type()),*]
            }

            fn return_type() -> ReturnType {
                R::return_type()
            }

            fn call(&self, controller: &C, mut args: Arguments) -> Result<BoxedValue, ActionError> {
                $(let $arg = args.take::<$arg>()?;)*
                let reply = self(controller, $($arg),*).map_err(Into::into)?;
                Ok(Box::new(reply))
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
impl_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_handler!(A1, A2, A3, A4, A5, A6, A7, A8);
