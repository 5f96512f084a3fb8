//! switchyard demo server.
//!
//! Serves a handful of routes that exercise routing, middleware, timeouts and
//! prefork. Run with `--config <path>` to load a TOML config; defaults apply
//! otherwise.
//!
//! ```text
//! GET  /               plain greeting
//! GET  /worker         pid of the process that served the request
//! GET  /users/{id}     path parameter echo
//! POST /api/echo       body echo, behind a bearer-token check
//! GET  /slow?ms=N      sleeps N ms, with a 1s route timeout
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method, StatusCode};
use clap::Parser;
use futures_util::future::BoxFuture;
use serde_json::json;

use switchyard::config::{load_config, Config};
use switchyard::observability::logging;
use switchyard::{App, Middleware, ProcessSupervisor, RequestContext, Route, ViewResult};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Routing and process supervision demo server", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("switchyard: {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    if let Err(e) = logging::init(&config.observability) {
        eprintln!("switchyard: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");

    let app = match demo_app(config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "Route registration failed");
            return ExitCode::FAILURE;
        }
    };

    match ProcessSupervisor::new(app).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "switchyard exited with error");
            ExitCode::FAILURE
        }
    }
}

fn demo_app(config: Config) -> Result<App, switchyard::RouterError> {
    let app = App::new(config);

    app.get("/", index)?;
    app.get("/worker", worker)?;
    app.get("/users/{id}", user)?;
    app.add(
        Route::new(Method::GET, "/slow", slow).timeout(
            Duration::from_secs(1),
            "request took too long",
            StatusCode::SERVICE_UNAVAILABLE,
        ),
    )?;

    let api = app.group("/api")?;
    api.use_before(Middleware::named("bearer", require_bearer))?;
    api.use_after(Middleware::named("served-by", served_by))?;
    api.post("/echo", echo)?;

    Ok(app)
}

fn index(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        ctx.text("switchyard");
        Ok(())
    })
}

fn worker(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        ctx.json(&json!({
            "pid": std::process::id(),
            "worker": switchyard::lifecycle::prefork::worker_id(),
        }))
    })
}

fn user(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        let id = ctx.param("id").unwrap_or_default().to_string();
        ctx.json(&json!({ "id": id }))
    })
}

fn slow(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        let ms = ctx
            .uri()
            .query()
            .and_then(|q| q.strip_prefix("ms="))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        ctx.text(format!("slept {}ms", ms));
        Ok(())
    })
}

fn echo(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        let body = ctx.body_bytes().await?;
        ctx.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        ctx.set_body(body);
        Ok(())
    })
}

fn require_bearer(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        let authorized = ctx
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Bearer "));
        if !authorized {
            ctx.error("missing bearer token", StatusCode::UNAUTHORIZED);
            ctx.stop();
        }
        Ok(())
    })
}

fn served_by(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        ctx.set_header(
            header::HeaderName::from_static("x-served-by"),
            HeaderValue::from(std::process::id()),
        );
        Ok(())
    })
}
