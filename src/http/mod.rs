//! HTTP request handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → server.rs (edge layers: request ID, trace, body limit, compression)
//!     → dispatch.rs (host table → route resolution → pipeline)
//!         → before middlewares → view → after middlewares (view.rs)
//!         → context.rs carries request, params and the response being built
//!     → response.rs (default not-found / 405 / error / panic / timeout views)
//!     → Send to client
//! ```

pub mod context;
pub mod dispatch;
pub mod response;
pub mod server;
pub mod view;

pub use context::RequestContext;
pub use dispatch::{Dispatcher, Hooks};
pub use server::HttpServer;
pub use view::{BoxError, ConnStateHook, ErrorView, Handler, Middleware, PanicView, View, ViewResult};
