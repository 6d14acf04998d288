//! HTTP routes for the session frontend

use crate::common::Result;
use crate::frontend::middleware::{session_middleware, Session};
use crate::session::{BoundResources, GuardDecision};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Extension, Form, Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct FrontendState {
    pub resources: Arc<BoundResources>,
    pub title: String,
}

impl FrontendState {
    pub fn new(resources: Arc<BoundResources>, title: impl Into<String>) -> Self {
        Self {
            resources,
            title: title.into(),
        }
    }
}

pub fn create_router(state: FrontendState) -> Router {
    let pages = Router::new()
        .route("/", get(index))
        .route("/main", get(main_page))
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ));

    Router::new()
        .merge(pages)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Redirect {
    Redirect::to("/main")
}

async fn main_page(State(state): State<FrontendState>, Extension(session): Extension<Session>) -> Response {
    let Some(user) = session.get("login") else {
        return Redirect::to("/login").into_response();
    };
    let user = user.as_str().unwrap_or_default().to_string();

    Html(format!(
        "<!DOCTYPE html><html><head><title>{title}</title></head>\
         <body><h1>{title}</h1><p>Signed in as {user}</p>\
         <a href=\"/logout\">Log out</a></body></html>",
        title = escape(&state.title),
        user = escape(&user),
    ))
    .into_response()
}

async fn login_page() -> Html<&'static str> {
    Html(
        "<!DOCTYPE html><html><head><title>Log in</title></head><body>\
         <form method=\"post\" action=\"/login\">\
         <input name=\"username\" placeholder=\"username\">\
         <button type=\"submit\">Log in</button>\
         </form></body></html>",
    )
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
}

async fn login(
    State(state): State<FrontendState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(session): Extension<Session>,
    Form(form): Form<LoginForm>,
) -> Response {
    let client = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match check_guard(&state.resources, &client).await {
        Ok(GuardDecision::Allowed { .. }) => {}
        Ok(GuardDecision::Blocked { retry_after }) => {
            tracing::warn!("login attempts from {} blocked for {:?}", client, retry_after);
            let secs = retry_after.as_secs().max(1);
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                "too many login attempts",
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!("login guard unavailable: {}", e);
            return (e.to_http_status(), "login guard unavailable").into_response();
        }
    }

    let username = form.username.trim();
    if username.is_empty() {
        return (StatusCode::UNAUTHORIZED, "username required").into_response();
    }

    if let Err(e) = reset_guard(&state.resources, &client).await {
        tracing::warn!("could not reset login attempts for {}: {}", client, e);
    }
    session.insert("login", username);
    Redirect::to("/main").into_response()
}

async fn logout(Extension(session): Extension<Session>) -> Redirect {
    session.remove("login");
    Redirect::to("/login")
}

async fn health(State(state): State<FrontendState>) -> impl IntoResponse {
    let status = state.resources.factory().registry().status();
    let code = if status.is_degraded() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(status))
}

/// Count a login attempt, rebinding once if the guard's node went away
async fn check_guard(resources: &BoundResources, key: &str) -> Result<GuardDecision> {
    let guard = resources.login_guard()?;
    match guard.check(key).await {
        Err(e) if e.is_retryable() => {
            resources.rebind_session(guard.generation())?;
            resources.login_guard()?.check(key).await
        }
        other => other,
    }
}

async fn reset_guard(resources: &BoundResources, key: &str) -> Result<()> {
    resources.login_guard()?.reset(key).await
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
