//! Session middleware
//!
//! Loads the session named by the request cookie before the handler runs
//! and writes it back afterwards. A store call that fails with a retryable
//! error is retried once against a fresh binding; if that fails too the
//! request is answered with 503.

use crate::common::{Result, SessionConfig};
use crate::frontend::http::FrontendState;
use crate::session::{Binding, BoundResources, SessionData, SessionStore};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug)]
struct SessionInner {
    id: String,
    data: SessionData,
    is_new: bool,
    dirty: bool,
    destroyed: bool,
}

/// Per-request session, available to handlers as an `Extension`
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Session {
    fn new(id: String, data: SessionData, is_new: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                id,
                data,
                is_new,
                dirty: false,
                destroyed: false,
            })),
        }
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    pub fn get(&self, field: &str) -> Option<serde_json::Value> {
        self.lock().data.get(field).cloned()
    }

    pub fn insert(&self, field: impl Into<String>, value: impl Into<serde_json::Value>) {
        let mut inner = self.lock();
        inner.data.insert(field.into(), value.into());
        inner.dirty = true;
    }

    pub fn remove(&self, field: &str) -> Option<serde_json::Value> {
        let mut inner = self.lock();
        let removed = inner.data.remove(field);
        inner.dirty |= removed.is_some();
        removed
    }

    /// Delete the session from the store once the response is ready
    pub fn destroy(&self) {
        self.lock().destroyed = true;
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run `op` against the current session binding, rebinding and retrying
/// once when it fails with a retryable error
pub async fn with_session_store<T, F, Fut>(resources: &BoundResources, op: F) -> Result<T>
where
    F: Fn(Binding<SessionStore>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let binding = resources.session()?;
    match op(binding.clone()).await {
        Err(e) if e.is_retryable() => {
            tracing::warn!(
                generation = binding.generation(),
                "session store on {} unusable ({}), rebinding",
                binding.node().label(),
                e
            );
            let binding = resources.rebind_session(binding.generation())?;
            op(binding).await
        }
        other => other,
    }
}

pub async fn session_middleware(
    State(state): State<FrontendState>,
    mut request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let resources = state.resources.as_ref();
    let config = state.resources.factory().session_config();

    let sid = session_id(request.headers(), &config.cookie_name);
    let loaded = match &sid {
        Some(sid) => {
            let sid = sid.as_str();
            with_session_store(resources, |store| async move { store.load(sid).await }).await
        }
        None => Ok(None),
    };

    let session = match (sid, loaded) {
        (_, Err(e)) => return unavailable(e),
        (Some(sid), Ok(Some(data))) => Session::new(sid, data, false),
        _ => Session::new(Uuid::new_v4().to_string(), SessionData::new(), true),
    };

    request.extensions_mut().insert(session.clone());
    let mut response = next.run(request).await;

    let (id, data, is_new, dirty, destroyed) = {
        let inner = session.lock();
        (
            inner.id.clone(),
            inner.data.clone(),
            inner.is_new,
            inner.dirty,
            inner.destroyed,
        )
    };
    let id = id.as_str();

    if destroyed {
        if let Err(e) =
            with_session_store(resources, |store| async move { store.destroy(id).await }).await
        {
            return unavailable(e);
        }
        set_cookie(&mut response, config, id, true);
    } else if is_new || dirty {
        let data = &data;
        if let Err(e) =
            with_session_store(resources, |store| async move { store.save(id, data).await }).await
        {
            return unavailable(e);
        }
        if is_new {
            set_cookie(&mut response, config, id, false);
        }
    }

    response
}

fn unavailable(e: crate::Error) -> Response<Body> {
    tracing::error!("session store unavailable: {}", e);
    let status = if e.is_retryable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        e.to_http_status()
    };
    (status, "session store unavailable").into_response()
}

/// Extract the session id from the `Cookie` header
pub fn session_id(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn set_cookie(response: &mut Response<Body>, config: &SessionConfig, id: &str, expire: bool) {
    let cookie = if expire {
        format!("{}=; Path=/; HttpOnly; Max-Age=0", config.cookie_name)
    } else {
        format!("{}={}; Path=/; HttpOnly", config.cookie_name, id)
    };
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; sid=abc-123; other=1"),
        );
        assert_eq!(session_id(&headers, "sid").as_deref(), Some("abc-123"));
        assert_eq!(session_id(&headers, "missing"), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("sid="));
        assert_eq!(session_id(&headers, "sid"), None);
    }

    #[test]
    fn test_session_dirty_tracking() {
        let session = Session::new("s1".into(), SessionData::new(), false);
        assert!(session.remove("login").is_none());
        assert!(!session.lock().dirty);

        session.insert("login", "alice");
        assert_eq!(session.get("login"), Some(serde_json::json!("alice")));
        assert!(session.lock().dirty);
    }
}
