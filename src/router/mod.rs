//! The action registry: owns every [`Action`] of one mounted API and
//! dispatches exchanges to them.
//!
//! Setup and serving are two phases. Controllers are registered through
//! `&mut self` while the registry is being assembled; the first call to
//! [`ActionRegistry::handle`] (or an explicit [`seal`](ActionRegistry::seal))
//! freezes it, and later registrations fail with
//! [`ConfigurationError::RegistrySealed`].
//!
//! Matching a request:
//!
//! | Candidates                               | Outcome                     |
//! |------------------------------------------|-----------------------------|
//! | none                                     | `404 No route for GET /x`   |
//! | exactly one                              | invoked                     |
//! | several, one of them requires a parameter | that one is invoked         |
//! | several, otherwise                       | `404`, logged at warn level |

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::action::{Action, ActionKey, Controller, ControllerSet, PendingController};
use crate::context::PathParams;
use crate::error::{ActionError, CompositeConfigurationError, ConfigurationError, HttpRequestError};
use crate::exchange::Exchange;
use crate::http::StatusCode;
use crate::mapping::MapperRegistry;

/// Body of every `500` response; the cause is only logged.
pub(crate) const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Receives the handler latency of every invoked action.
pub trait ActionTimer: Send + Sync {
    fn record(&self, action: &ActionKey, elapsed: Duration);
}

/// Logs latencies at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTimer;

impl ActionTimer for TracingTimer {
    fn record(&self, action: &ActionKey, elapsed: Duration) {
        let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        debug!(action = %action, elapsed_us, "action completed");
    }
}

/// What [`ActionRegistry::handle`] did with an exchange. The response has
/// already been written in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An action ran to completion.
    Handled,
    /// No action matched, or several did and none could be preferred.
    NotFound,
    /// A binder or handler rejected the request with this status.
    Rejected(StatusCode),
    /// An unanticipated error or panic; a generic `500` was sent.
    Failed,
}

enum Resolution<'a> {
    Found(&'a Action, Result<PathParams, HttpRequestError>),
    NotFound,
    Ambiguous(Vec<&'a Action>),
}

/// Every action of one mounted API.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use actionroute::action::{Controller, Routes};
/// use actionroute::error::ActionError;
/// use actionroute::exchange::RequestExchange;
/// use actionroute::http::Request;
/// use actionroute::mapping::{ContentBody, PathParam};
/// use actionroute::router::{ActionRegistry, DispatchOutcome};
///
/// struct Echo;
///
/// impl Echo {
///     fn echo(&self, word: String) -> Result<String, ActionError> {
///         Ok(word)
///     }
/// }
///
/// impl Controller for Echo {
///     fn routes(routes: &mut Routes<Self>) {
///         routes
///             .action("echo", Self::echo)
///             .get("/echo/:word")
///             .param(PathParam::named("word"))
///             .returns(ContentBody::new());
///     }
/// }
///
/// let mut registry = ActionRegistry::new();
/// registry.register_controller(Arc::new(Echo)).unwrap();
///
/// let (request, _) = Request::parse(b"GET /echo/hi HTTP/1.1\r\n\r\n").unwrap();
/// let mut exchange = RequestExchange::new(request);
/// assert_eq!(registry.handle(&mut exchange), DispatchOutcome::Handled);
/// assert_eq!(exchange.response().body_text(), "hi");
/// ```
pub struct ActionRegistry {
    actions: Vec<Action>,
    mappers: MapperRegistry,
    timer: Arc<dyn ActionTimer>,
    sealed: AtomicBool,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    /// An empty registry using the built-in mappings and [`TracingTimer`].
    pub fn new() -> Self {
        Self::with_mappers(MapperRegistry::default())
    }

    pub fn with_mappers(mappers: MapperRegistry) -> Self {
        Self {
            actions: Vec::new(),
            mappers,
            timer: Arc::new(TracingTimer),
            sealed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_timer(mut self, timer: Arc<dyn ActionTimer>) -> Self {
        self.timer = timer;
        self
    }

    /// The factories used to build registered controllers.
    pub fn mappers_mut(&mut self) -> &mut MapperRegistry {
        &mut self.mappers
    }

    /// Builds and adds the actions of one controller.
    ///
    /// # Errors
    ///
    /// Every configuration problem of the controller, including routes that
    /// are already registered. Nothing is added in that case.
    pub fn register_controller<C: Controller>(
        &mut self,
        controller: Arc<C>,
    ) -> Result<(), CompositeConfigurationError> {
        self.register_controllers(ControllerSet::new().with(controller))
    }

    /// Builds every controller of `set`, then adds the actions of those that
    /// built cleanly and do not clash with an existing route.
    ///
    /// All controllers are tried before anything is reported.
    ///
    /// # Errors
    ///
    /// The problems of every failed controller, together.
    pub fn register_controllers(
        &mut self,
        set: ControllerSet,
    ) -> Result<(), CompositeConfigurationError> {
        let mut errors = CompositeConfigurationError::new();
        if self.is_sealed() {
            errors.push("ActionRegistry", ConfigurationError::RegistrySealed);
            return Err(errors);
        }

        for pending in set.into_pending() {
            let actions = match pending.build(&self.mappers) {
                Ok(actions) => actions,
                Err(failed) => {
                    errors.extend_from(failed);
                    continue;
                }
            };

            let mut clashes = CompositeConfigurationError::new();
            for (index, action) in actions.iter().enumerate() {
                let existing = self
                    .actions
                    .iter()
                    .chain(&actions[..index])
                    .find(|other| other.key() == action.key());
                if let Some(existing) = existing {
                    clashes.push(
                        action.qualified_name(),
                        ConfigurationError::DuplicateRoute {
                            route: action.key().to_string(),
                            existing: existing.qualified_name(),
                        },
                    );
                }
            }

            if clashes.is_empty() {
                for action in &actions {
                    debug!(route = %action.key(), handler = %action.qualified_name(), "action registered");
                }
                self.actions.extend(actions);
            } else {
                errors.extend_from(clashes);
            }
        }

        errors.into_result()
    }

    /// Adds one prebuilt action.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::RegistrySealed`] once serving started, or
    /// [`ConfigurationError::DuplicateRoute`] for a known route.
    pub fn add_action(&mut self, action: Action) -> Result<(), ConfigurationError> {
        if self.is_sealed() {
            return Err(ConfigurationError::RegistrySealed);
        }
        if let Some(existing) = self.actions.iter().find(|a| a.key() == action.key()) {
            return Err(ConfigurationError::DuplicateRoute {
                route: action.key().to_string(),
                existing: existing.qualified_name(),
            });
        }
        self.actions.push(action);
        Ok(())
    }

    /// Ends the setup phase.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// The action that would serve `exchange`, with its path parameters.
    ///
    /// `None` also when the captured path values do not decode.
    pub fn find(&self, exchange: &dyn Exchange) -> Option<(&Action, PathParams)> {
        match self.resolve(exchange) {
            Resolution::Found(action, Ok(params)) => Some((action, params)),
            Resolution::Found(_, Err(_)) | Resolution::NotFound | Resolution::Ambiguous(_) => None,
        }
    }

    fn resolve(&self, exchange: &dyn Exchange) -> Resolution<'_> {
        let method = exchange.http_method();
        let path = exchange.path_info();

        let mut candidates: Vec<(&Action, Result<PathParams, HttpRequestError>)> = self
            .actions
            .iter()
            .filter(|action| action.http_method() == method)
            .filter(|action| action.pattern().accepts_query(exchange))
            .filter_map(|action| action.pattern().matches(path).map(|params| (action, params)))
            .collect();

        if candidates.len() > 1 {
            let all: Vec<&Action> = candidates.iter().map(|(action, _)| *action).collect();
            candidates.retain(|(action, _)| action.requires_parameter());
            if candidates.len() != 1 {
                return Resolution::Ambiguous(all);
            }
        }

        match candidates.pop() {
            Some((action, params)) => Resolution::Found(action, params),
            None => Resolution::NotFound,
        }
    }

    /// Serves one exchange: matches, binds, invokes and writes the response.
    ///
    /// Never fails; every error becomes a response. The first call seals
    /// the registry.
    pub fn handle(&self, exchange: &mut dyn Exchange) -> DispatchOutcome {
        self.seal();
        let method = exchange.http_method().to_owned();
        let path = exchange.path_info().to_owned();

        let (action, params) = match self.resolve(exchange) {
            Resolution::Found(action, Ok(params)) => (action, params),
            Resolution::Found(action, Err(rejection)) => {
                debug!(action = %action.key(), %method, %path, error = %rejection.message(), "undecodable path parameter");
                exchange.send_error(rejection.status(), Some(rejection.message()));
                return DispatchOutcome::Rejected(rejection.status());
            }
            Resolution::NotFound => {
                debug!(%method, %path, "no route");
                exchange.send_error(StatusCode::NotFound, Some(&format!("No route for {method} {path}")));
                return DispatchOutcome::NotFound;
            }
            Resolution::Ambiguous(candidates) => {
                let names: Vec<String> = candidates.iter().map(|a| a.qualified_name()).collect();
                warn!(%method, %path, candidates = ?names, "ambiguous route, answering 404");
                exchange.send_error(StatusCode::NotFound, Some(&format!("No route for {method} {path}")));
                return DispatchOutcome::NotFound;
            }
        };

        exchange.set_path_parameters(params);
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| action.invoke(&mut *exchange)));
        self.timer.record(action.key(), started.elapsed());

        match result {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(ActionError::Request(rejection))) => {
                debug!(controller = action.controller_name(), action = action.name(), %method, %path, status = %rejection.status(), "request rejected");
                exchange.send_error(rejection.status(), Some(rejection.message()));
                DispatchOutcome::Rejected(rejection.status())
            }
            Ok(Err(ActionError::Action(rejection))) => {
                debug!(controller = action.controller_name(), action = action.name(), %method, %path, status = %rejection.status(), "request rejected");
                rejection.render(exchange);
                DispatchOutcome::Rejected(rejection.status())
            }
            Ok(Err(ActionError::Internal(cause))) => {
                error!(controller = action.controller_name(), action = action.name(), %method, %path, error = %cause, "action failed");
                exchange.send_error(StatusCode::InternalServerError, Some(INTERNAL_ERROR_MESSAGE));
                DispatchOutcome::Failed
            }
            Err(payload) => {
                error!(controller = action.controller_name(), action = action.name(), %method, %path, panic = panic_message(&*payload), "action panicked");
                exchange.send_error(StatusCode::InternalServerError, Some(INTERNAL_ERROR_MESSAGE));
                DispatchOutcome::Failed
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions)
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
