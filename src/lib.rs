//! # actionroute
//!
//! Controller action dispatch over HTTP/1.1.
//!
//! A controller declares its methods as actions: a route (`GET /users/:id`),
//! one mapping per argument saying where the value comes from, and a mapping
//! for the return value. Those declarations are built once into [`Action`]s,
//! registered in an [`ActionRegistry`] and dispatched per request, with every
//! failure turned into a well-formed response.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use actionroute::action::{Controller, Routes};
//! use actionroute::error::ActionError;
//! use actionroute::mapping::{ContentBody, PathParam};
//! use actionroute::router::ActionRegistry;
//! use actionroute::server::Server;
//!
//! struct Users;
//!
//! impl Users {
//!     fn show(&self, id: i64) -> Result<String, ActionError> {
//!         Ok(format!("user {id}"))
//!     }
//! }
//!
//! impl Controller for Users {
//!     fn routes(routes: &mut Routes<Self>) {
//!         routes
//!             .action("show", Self::show)
//!             .get("/users/:id")
//!             .param(PathParam::named("id"))
//!             .returns(ContentBody::new());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut api = ActionRegistry::new();
//!     api.register_controller(Arc::new(Users))?;
//!     Server::bind("127.0.0.1:8080").await?.mount("/api", api).run().await?;
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod context;
pub mod error;
pub mod exchange;
pub mod http;
pub mod mapping;
pub mod router;
pub mod server;

pub use action::{Action, Controller, ControllerSet, Routes};
pub use error::{ActionError, CompositeConfigurationError, ConfigurationError, HttpRequestError};
pub use exchange::{Exchange, RequestExchange};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{ActionRegistry, DispatchOutcome};
pub use server::{Server, ServerError};
