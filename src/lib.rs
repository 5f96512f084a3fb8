//! switchyard: request routing, middleware dispatch and process supervision
//! for HTTP services.

pub mod app;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use app::App;
pub use config::Config;
pub use http::{
    BoxError, ConnStateHook, Dispatcher, ErrorView, Handler, Hooks, HttpServer, Middleware,
    PanicView, RequestContext, View, ViewResult,
};
pub use lifecycle::{ProcessSupervisor, Role, ServerError, Shutdown, SupervisorHandle, SupervisorState};
pub use net::{ConnState, ConnectionId};
pub use routing::{Middlewares, Route, RouteMethod, RouteTimeout, Router, RouterError};
