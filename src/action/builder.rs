//! Declaring controllers and turning them into [`Action`]s.
//!
//! A controller lists its methods in [`Controller::routes`]. Each
//! [`MethodDeclaration`] carries the metadata that reflection-based
//! frameworks would read from annotations: at most one route, one mapping
//! per handler argument and an optional return mapping.
//!
//! ```
//! use actionroute::action::{Controller, Routes};
//! use actionroute::error::ActionError;
//! use actionroute::mapping::{ContentBody, RequestParam};
//!
//! struct Greeter;
//!
//! impl Greeter {
//!     fn hello(&self, name: Option<String>) -> Result<String, ActionError> {
//!         Ok(format!("Hello, {}", name.as_deref().unwrap_or("world")))
//!     }
//! }
//!
//! impl Controller for Greeter {
//!     fn routes(routes: &mut Routes<Self>) {
//!         routes
//!             .action("hello", Self::hello)
//!             .get("/hello")
//!             .param(RequestParam::named("name"))
//!             .returns(ContentBody::new());
//!     }
//! }
//! ```

use std::any::type_name;
use std::sync::Arc;

use tracing::debug;

use super::{Access, Action, Arguments, Delete, Get, Handler, Invoker, Post, Put};
use crate::error::{ActionError, CompositeConfigurationError, ConfigurationError};
use crate::mapping::{
    BoxedValue, BuildContext, MapperRegistry, ParameterDeclaration, ParameterMetadata,
    ParameterType, ReturnMetadata, ReturnType, RouteMetadata,
};

/// An object whose methods become actions.
///
/// The instance is shared (`Arc`) by every action built from it and must be
/// safe to call from many requests at once.
pub trait Controller: Send + Sync + Sized + 'static {
    /// Declares the controller's methods.
    fn routes(routes: &mut Routes<Self>);

    /// Name used in logs and configuration errors. Defaults to the type name
    /// without its module path.
    fn name(&self) -> String {
        short_type_name::<Self>()
    }
}

fn short_type_name<T>() -> String {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_owned()
}

type Call<C> = Box<dyn Fn(&C, Arguments) -> Result<BoxedValue, ActionError> + Send + Sync>;

/// The method declarations of one controller.
pub struct Routes<C> {
    methods: Vec<MethodDeclaration<C>>,
}

impl<C: Controller> Routes<C> {
    fn new() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    /// Declares one controller method.
    ///
    /// `handler` is usually a method path such as `Self::show`; its
    /// signature decides the argument and return types the mappings see.
    pub fn action<H, Args>(&mut self, name: &str, handler: H) -> &mut MethodDeclaration<C>
    where
        H: Handler<C, Args>,
        Args: 'static,
    {
        let call: Call<C> = Box::new(move |controller: &C, args: Arguments| {
            <H as Handler<C, Args>>::call(&handler, controller, args)
        });
        self.methods.push(MethodDeclaration {
            name: name.to_owned(),
            routes: Vec::new(),
            params: Vec::new(),
            returns: Vec::new(),
            access: Access::default(),
            parameter_types: H::parameter_types(),
            return_type: H::return_type(),
            call,
        });
        let last = self.methods.len() - 1;
        &mut self.methods[last]
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Metadata of one controller method.
pub struct MethodDeclaration<C> {
    name: String,
    routes: Vec<Box<dyn RouteMetadata>>,
    params: Vec<(Option<String>, Box<dyn ParameterMetadata>)>,
    returns: Vec<Box<dyn ReturnMetadata>>,
    access: Access,
    parameter_types: Vec<ParameterType>,
    return_type: ReturnType,
    call: Call<C>,
}

impl<C: Controller> MethodDeclaration<C> {
    pub fn get(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.route(Get::new(pattern))
    }

    pub fn post(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.route(Post::new(pattern))
    }

    pub fn put(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.route(Put::new(pattern))
    }

    pub fn delete(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.route(Delete::new(pattern))
    }

    /// Attaches route metadata of any registered kind.
    pub fn route(&mut self, metadata: impl RouteMetadata) -> &mut Self {
        self.routes.push(Box::new(metadata));
        self
    }

    /// Maps the next handler argument.
    pub fn param(&mut self, metadata: impl ParameterMetadata) -> &mut Self {
        self.params.push((None, Box::new(metadata)));
        self
    }

    /// Maps the next handler argument and gives it a name, used by mappings
    /// whose metadata carries none.
    pub fn param_as(
        &mut self,
        name: impl Into<String>,
        metadata: impl ParameterMetadata,
    ) -> &mut Self {
        self.params.push((Some(name.into()), Box::new(metadata)));
        self
    }

    pub fn returns(&mut self, metadata: impl ReturnMetadata) -> &mut Self {
        self.returns.push(Box::new(metadata));
        self
    }

    /// Rejects anonymous requests with `401`.
    pub fn require_login(&mut self) -> &mut Self {
        self.access.login = true;
        self
    }

    /// Requires the principal to hold `role` (or any other role required
    /// the same way); `401` when anonymous, `403` otherwise.
    pub fn require_role(&mut self, role: impl Into<String>) -> &mut Self {
        self.access.roles.push(role.into());
        self
    }

    fn build(
        self,
        controller: &Arc<C>,
        controller_name: &str,
        mappers: &MapperRegistry,
    ) -> Result<Option<Action>, ConfigurationError> {
        let route = match self.routes.as_slice() {
            [] => {
                debug!(controller = controller_name, action = %self.name, "no route mapping, skipped");
                return Ok(None);
            }
            [route] => route,
            [first, second, ..] => {
                return Err(ConfigurationError::MultipleRoutes {
                    first: first.kind().to_string(),
                    second: second.kind().to_string(),
                });
            }
        };
        let binding = mappers.action_factory(route.kind())?.create(&**route)?;

        let arity = self.parameter_types.len();
        if let Some((_, extra)) = self.params.get(arity) {
            return Err(ConfigurationError::UnmappedMetadata {
                mapping: extra.kind().to_string(),
                index: arity,
                arity,
            });
        }

        let context = BuildContext {
            action: &self.name,
            http_method: &binding.method,
            pattern: &binding.pattern,
        };

        let mut binders = Vec::with_capacity(arity);
        for (index, ty) in self.parameter_types.into_iter().enumerate() {
            let Some((name, metadata)) = self.params.get(index) else {
                return Err(ConfigurationError::MissingParameterMapping {
                    index,
                    type_name: ty.type_name(),
                });
            };
            let declaration = ParameterDeclaration::new(index, name.clone(), ty);
            let factory = mappers.parameter_factory(metadata.kind())?;
            binders.push(factory.create(&**metadata, &declaration, &context)?);
        }

        let return_binder = match self.returns.as_slice() {
            [] if self.return_type.is_void() => None,
            [] => {
                return Err(ConfigurationError::MissingReturnMapping {
                    type_name: self.return_type.type_name(),
                });
            }
            [metadata] => {
                let factory = mappers.return_factory(metadata.kind())?;
                Some(factory.create(&**metadata, &self.return_type, &context)?)
            }
            [first, second, ..] => {
                return Err(ConfigurationError::MultipleReturns {
                    first: first.kind().to_string(),
                    second: second.kind().to_string(),
                });
            }
        };

        let call = self.call;
        let target = Arc::clone(controller);
        let invoker: Invoker = Box::new(move |args: Arguments| call(&*target, args));

        Ok(Some(Action::new(
            binding,
            controller_name.to_owned(),
            self.name,
            binders,
            return_binder,
            self.access,
            invoker,
        )))
    }
}

/// Builds every action of `controller`.
///
/// Each method stops at its first problem, but every method is tried and all
/// problems are reported together, keyed `Controller::method`. A controller
/// without any routable method is an error of its own.
///
/// # Errors
///
/// The collected [`ConfigurationError`]s if any method failed.
pub fn build_actions<C: Controller>(
    controller: &Arc<C>,
    mappers: &MapperRegistry,
) -> Result<Vec<Action>, CompositeConfigurationError> {
    let controller_name = controller.name();
    let mut routes = Routes::new();
    C::routes(&mut routes);

    let mut actions = Vec::with_capacity(routes.len());
    let mut errors = CompositeConfigurationError::new();
    for method in routes.methods {
        let context = format!("{controller_name}::{}", method.name);
        match method.build(controller, &controller_name, mappers) {
            Ok(Some(action)) => actions.push(action),
            Ok(None) => {}
            Err(error) => errors.push(context, error),
        }
    }

    if actions.is_empty() && errors.is_empty() {
        errors.push(
            controller_name.clone(),
            ConfigurationError::ControllerHasNoActions {
                controller: controller_name,
            },
        );
    }
    errors.into_result().map(|()| actions)
}

/// A controller waiting to be built by a registry.
pub(crate) trait PendingController: Send + Sync {
    fn build(&self, mappers: &MapperRegistry) -> Result<Vec<Action>, CompositeConfigurationError>;
}

impl<C: Controller> PendingController for Arc<C> {
    fn build(&self, mappers: &MapperRegistry) -> Result<Vec<Action>, CompositeConfigurationError> {
        build_actions(self, mappers)
    }
}

/// Controllers of different types registered in one pass.
#[derive(Default)]
pub struct ControllerSet {
    controllers: Vec<Box<dyn PendingController>>,
}

impl ControllerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<C: Controller>(&mut self, controller: Arc<C>) -> &mut Self {
        self.controllers.push(Box::new(controller));
        self
    }

    #[must_use]
    pub fn with<C: Controller>(mut self, controller: Arc<C>) -> Self {
        self.add(controller);
        self
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub(crate) fn into_pending(self) -> Vec<Box<dyn PendingController>> {
        self.controllers
    }
}
