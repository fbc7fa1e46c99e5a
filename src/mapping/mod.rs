//! The mapping factory protocol.
//!
//! Each piece of metadata attached to a handler argument, a return value or
//! a route names its factory through a [`MappingKind`]. A [`MapperRegistry`]
//! maps kinds to factories; at build time the action builder looks up the
//! factory for every metadata item and asks it for a binder.
//!
//! ```text
//! RequestParam::named("q") ──kind "request-param"──▶ RequestParamFactory
//!        + ParameterType of the argument (Option<String>)
//!        ──create──▶ Box<dyn ParameterBinder>   (runs per request)
//! ```
//!
//! New request data sources, return encodings and verbs are added by
//! registering a factory under a new kind; the router never changes.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::action::{ActionFactory, Delete, Get, HttpVerbFactory, PathPattern, Post, Put};
use crate::error::{ActionError, ConfigurationError};
use crate::exchange::Exchange;

mod params;
mod returns;
mod types;

pub use params::{
    ClientCert, ClientCertFactory, ContextObject, ContextObjectFactory, Cookie, CookieFactory,
    JsonBodyParamFactory, PathParam, PathParamFactory, RequestBody, RequestBodyFactory,
    RequestHeader, RequestHeaderFactory, RequestParam, RequestParamFactory, ResponseCookie,
    UserPrincipal, UserPrincipalFactory,
};
pub use returns::{
    ContentBody, ContentBodyFactory, HttpStatus, HttpStatusFactory, JsonBody, JsonBodyFactory,
    ResponseHeader, ResponseHeaderFactory, SendRedirect, SendRedirectFactory,
};
pub use types::{
    BoxedValue, FromParam, Injected, Json, Parameter, ParameterType, Reply, ReturnType, ValueType,
};

/// Names the factory responsible for a metadata item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingKind(&'static str);

impl MappingKind {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Upcast to `Any` so factories can recover their concrete metadata type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Metadata attached to one handler argument.
pub trait ParameterMetadata: AsAny + fmt::Debug + Send + Sync {
    fn kind(&self) -> MappingKind;
}

/// Metadata describing how a handler's return value is written.
pub trait ReturnMetadata: AsAny + fmt::Debug + Send + Sync {
    fn kind(&self) -> MappingKind;
}

/// Metadata that makes a controller method routable.
pub trait RouteMetadata: AsAny + fmt::Debug + Send + Sync {
    fn kind(&self) -> MappingKind;
}

/// Recovers the concrete metadata type a factory was registered for.
pub fn downcast_metadata<'a, T: 'static>(
    metadata: &'a dyn Any,
    kind: MappingKind,
) -> Result<&'a T, ConfigurationError> {
    metadata.downcast_ref::<T>().ok_or_else(|| {
        ConfigurationError::Invalid(format!(
            "factory for {kind} received metadata it does not understand"
        ))
    })
}

/// The declaration site a parameter factory builds for.
#[derive(Debug, Clone)]
pub struct ParameterDeclaration {
    index: usize,
    name: Option<String>,
    ty: ParameterType,
}

impl ParameterDeclaration {
    pub fn new(index: usize, name: Option<String>, ty: ParameterType) -> Self {
        Self { index, name, ty }
    }

    /// Position of the argument in the handler signature.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Name given with `param_as`, used when the metadata carries none.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ty(&self) -> &ParameterType {
        &self.ty
    }

    /// `explicit` if set, else the declared name, else a `MissingName` error.
    pub fn resolve_name(
        &self,
        explicit: Option<&str>,
        mapping: MappingKind,
    ) -> Result<String, ConfigurationError> {
        explicit
            .or(self.name())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| ConfigurationError::MissingName {
                mapping: mapping.to_string(),
                index: self.index,
            })
    }
}

/// What a factory knows about the action it is building for.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub action: &'a str,
    pub http_method: &'a str,
    pub pattern: &'a PathPattern,
}

/// The result of binding one argument.
///
/// `retained` is kept by the router and handed back to
/// [`ParameterBinder::on_complete`] once the handler succeeded.
pub struct Bound {
    pub(crate) argument: BoxedValue,
    pub(crate) retained: Option<BoxedValue>,
}

impl Bound {
    pub fn new(argument: BoxedValue) -> Self {
        Self {
            argument,
            retained: None,
        }
    }

    pub fn retaining(argument: BoxedValue, retained: BoxedValue) -> Self {
        Self {
            argument,
            retained: Some(retained),
        }
    }
}

/// Produces one handler argument from the exchange.
pub trait ParameterBinder: Send + Sync {
    fn bind(&self, exchange: &mut dyn Exchange) -> Result<Bound, ActionError>;

    /// Runs after the handler and the return binder succeeded.
    fn on_complete(&self, _exchange: &mut dyn Exchange, _retained: &BoxedValue) {}

    /// `true` if a request lacking the value this binder needs is rejected.
    fn requires_parameter(&self) -> bool {
        false
    }
}

/// Writes a handler's return value to the exchange.
pub trait ReturnBinder: Send + Sync {
    fn write(&self, value: BoxedValue, exchange: &mut dyn Exchange) -> Result<(), ActionError>;
}

pub trait ParameterMapperFactory: Send + Sync {
    fn create(
        &self,
        metadata: &dyn ParameterMetadata,
        declaration: &ParameterDeclaration,
        context: &BuildContext<'_>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError>;
}

pub trait ReturnMapperFactory: Send + Sync {
    fn create(
        &self,
        metadata: &dyn ReturnMetadata,
        return_type: &ReturnType,
        context: &BuildContext<'_>,
    ) -> Result<Box<dyn ReturnBinder>, ConfigurationError>;
}

/// Registry of factories keyed by [`MappingKind`].
///
/// [`MapperRegistry::default`] knows every built-in mapping and the four
/// standard verbs; [`MapperRegistry::empty`] knows nothing.
#[derive(Clone)]
pub struct MapperRegistry {
    parameters: HashMap<MappingKind, Arc<dyn ParameterMapperFactory>>,
    returns: HashMap<MappingKind, Arc<dyn ReturnMapperFactory>>,
    actions: HashMap<MappingKind, Arc<dyn ActionFactory>>,
}

impl MapperRegistry {
    pub fn empty() -> Self {
        Self {
            parameters: HashMap::new(),
            returns: HashMap::new(),
            actions: HashMap::new(),
        }
    }

    pub fn register_parameter(
        &mut self,
        kind: MappingKind,
        factory: impl ParameterMapperFactory + 'static,
    ) -> &mut Self {
        self.parameters.insert(kind, Arc::new(factory));
        self
    }

    pub fn register_return(
        &mut self,
        kind: MappingKind,
        factory: impl ReturnMapperFactory + 'static,
    ) -> &mut Self {
        self.returns.insert(kind, Arc::new(factory));
        self
    }

    pub fn register_action(
        &mut self,
        kind: MappingKind,
        factory: impl ActionFactory + 'static,
    ) -> &mut Self {
        self.actions.insert(kind, Arc::new(factory));
        self
    }

    pub fn parameter_factory(
        &self,
        kind: MappingKind,
    ) -> Result<&dyn ParameterMapperFactory, ConfigurationError> {
        self.parameters
            .get(&kind)
            .map(Arc::as_ref)
            .ok_or_else(|| no_factory("parameter", kind))
    }

    pub fn return_factory(
        &self,
        kind: MappingKind,
    ) -> Result<&dyn ReturnMapperFactory, ConfigurationError> {
        self.returns
            .get(&kind)
            .map(Arc::as_ref)
            .ok_or_else(|| no_factory("return", kind))
    }

    pub fn action_factory(&self, kind: MappingKind) -> Result<&dyn ActionFactory, ConfigurationError> {
        self.actions
            .get(&kind)
            .map(Arc::as_ref)
            .ok_or_else(|| no_factory("action", kind))
    }
}

fn no_factory(category: &'static str, kind: MappingKind) -> ConfigurationError {
    ConfigurationError::NoFactory {
        category,
        kind: kind.to_string(),
    }
}

impl Default for MapperRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register_action(Get::KIND, HttpVerbFactory::<Get>::new())
            .register_action(Post::KIND, HttpVerbFactory::<Post>::new())
            .register_action(Put::KIND, HttpVerbFactory::<Put>::new())
            .register_action(Delete::KIND, HttpVerbFactory::<Delete>::new())
            .register_parameter(RequestParam::KIND, RequestParamFactory)
            .register_parameter(PathParam::KIND, PathParamFactory)
            .register_parameter(RequestHeader::KIND, RequestHeaderFactory)
            .register_parameter(Cookie::KIND, CookieFactory)
            .register_parameter(RequestBody::KIND, RequestBodyFactory)
            .register_parameter(JsonBody::KIND, JsonBodyParamFactory)
            .register_parameter(UserPrincipal::KIND, UserPrincipalFactory)
            .register_parameter(ClientCert::KIND, ClientCertFactory)
            .register_parameter(ContextObject::KIND, ContextObjectFactory)
            .register_return(ContentBody::KIND, ContentBodyFactory)
            .register_return(JsonBody::KIND, JsonBodyFactory)
            .register_return(SendRedirect::KIND, SendRedirectFactory)
            .register_return(ResponseHeader::KIND, ResponseHeaderFactory)
            .register_return(HttpStatus::KIND, HttpStatusFactory);
        registry
    }
}

impl fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds = |map: Vec<&MappingKind>| {
            let mut names: Vec<_> = map.into_iter().map(MappingKind::name).collect();
            names.sort_unstable();
            names
        };
        f.debug_struct("MapperRegistry")
            .field("parameters", &kinds(self.parameters.keys().collect()))
            .field("returns", &kinds(self.returns.keys().collect()))
            .field("actions", &kinds(self.actions.keys().collect()))
            .finish()
    }
}
