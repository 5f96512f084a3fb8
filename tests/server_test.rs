//! End-to-end tests against a real listener.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderValue, Method, StatusCode};
use futures_util::future::BoxFuture;

use switchyard::{App, ConnState, Middleware, RequestContext, Route, ViewResult};

mod common;

fn hello(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        ctx.text("hello");
        Ok(())
    })
}

fn user(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        let id = ctx.param("id").unwrap_or_default().to_string();
        ctx.text(format!("user {}", id));
        Ok(())
    })
}

fn sleepy(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        ctx.text("finally");
        Ok(())
    })
}

fn boom(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        if ctx.path() == "/boom" {
            panic!("view exploded");
        }
        Ok(())
    })
}

fn deny(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        ctx.set_status(StatusCode::FORBIDDEN);
        Err("not allowed".into())
    })
}

fn stamp(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        ctx.set_header(
            header::HeaderName::from_static("x-stamped"),
            HeaderValue::from_static("yes"),
        );
        Ok(())
    })
}

#[tokio::test]
async fn routes_params_and_method_not_allowed() {
    let app = App::new(common::test_config());
    app.get("/", hello).unwrap();
    app.get("/users/{id}", user).unwrap();
    let server = common::start(app).await;
    let client = reqwest::Client::new();

    let response = client.get(server.url("/users/42")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "user 42");

    let response = client.post(server.url("/users/42")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW.as_str()], "GET, OPTIONS");

    let response = client
        .request(reqwest::Method::OPTIONS, server.url("/users/42"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()[header::ALLOW.as_str()], "GET, OPTIONS");

    let response = client.get(server.url("/nope")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn group_middleware_error_still_runs_after_chain() {
    let app = App::new(common::test_config());
    let admin = app.group("/admin").unwrap();
    admin.use_before(Middleware::named("deny", deny)).unwrap();
    admin.use_after(Middleware::named("stamp", stamp)).unwrap();
    admin.get("/panel", hello).unwrap();
    app.get("/open", hello).unwrap();
    let server = common::start(app).await;

    let response = reqwest::get(server.url("/admin/panel")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    assert_eq!(response.headers()["x-stamped"], "yes");
    assert_eq!(response.text().await.unwrap(), "not allowed");

    let response = reqwest::get(server.url("/open")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().get("x-stamped").is_none());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn route_timeout_answers_early() {
    let app = App::new(common::test_config());
    app.add(Route::new(Method::GET, "/slow", sleepy).timeout(
        Duration::from_millis(100),
        "too slow",
        StatusCode::SERVICE_UNAVAILABLE,
    ))
    .unwrap();
    let server = common::start(app).await;

    let started = Instant::now();
    let response = reqwest::get(server.url("/slow")).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(350));
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text().await.unwrap(), "too slow");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn panicking_view_does_not_take_the_server_down() {
    let app = App::new(common::test_config());
    app.get("/boom", boom).unwrap();
    app.get("/", hello).unwrap();
    let server = common::start(app).await;

    let response = reqwest::get(server.url("/boom")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    let response = reqwest::get(server.url("/")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "hello");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn virtual_host_gets_its_own_tree() {
    let mut app = App::new(common::test_config());
    app.get("/", hello).unwrap();
    app.virtual_host("api.example.test").get("/", user).unwrap();
    let server = common::start(app).await;
    let client = reqwest::Client::new();

    let response = client
        .get(server.url("/"))
        .header(header::HOST.as_str(), "API.example.test:8080")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "user ");

    let response = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "hello");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn drains_in_flight_requests_then_refuses() {
    let app = App::new(common::test_config());
    app.get("/slow", sleepy).unwrap();
    let server = common::start(app).await;
    let addr = server.addr;

    let in_flight = tokio::spawn({
        let url = server.url("/slow");
        async move { reqwest::get(url).await?.text().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.stop().await.unwrap();
    assert_eq!(in_flight.await.unwrap().unwrap(), "finally");
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn connection_state_hook_sees_every_connection() {
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));

    let mut app = App::new(common::test_config());
    app.get("/", hello).unwrap();
    app.on_conn_state({
        let opened = Arc::clone(&opened);
        let closed = Arc::clone(&closed);
        move |_id, state| match state {
            ConnState::New => {
                opened.fetch_add(1, Ordering::SeqCst);
            }
            ConnState::Closed => {
                closed.fetch_add(1, Ordering::SeqCst);
            }
        }
    });
    let server = common::start(app).await;

    for _ in 0..3 {
        let client = reqwest::Client::new();
        client.get(server.url("/")).send().await.unwrap();
    }
    server.stop().await.unwrap();

    assert_eq!(opened.load(Ordering::SeqCst), 3);
    assert_eq!(closed.load(Ordering::SeqCst), 3);
}
