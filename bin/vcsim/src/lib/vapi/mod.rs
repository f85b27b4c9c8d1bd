// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The vAPI REST services under `/api`.
//!
//! Sessions are created with HTTP Basic credentials and carried in the
//! `vmware-api-session-id` header. Resources with several operations on
//! one path select them with the `action` query parameter. Handlers lock
//! the vAPI state before the VIM inventory, never the other way around.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use chrono::{DateTime, Utc};
use dropshot::{
    endpoint, ClientErrorStatusCode, HttpError, HttpResponseCreated,
    HttpResponseDeleted, HttpResponseOk, RequestContext, UntypedBody,
};
use serde::de::DeserializeOwned;
use slog::{info, o, Logger};
use thiserror::Error;
use vim_api_types::vapi::{errors, ActionQuery, SessionInfo};

use crate::Context;

pub mod cluster;
pub mod library;
pub mod tags;
pub mod transfer;
pub mod vcenter;

/// Failures of vAPI operations, reported with the vAPI standard error
/// type as the error code.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("authentication required")]
    Unauthenticated,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not allowed in current state: {0}")]
    NotAllowed(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("resource inaccessible: {0}")]
    Inaccessible(String),
}

impl From<Error> for HttpError {
    fn from(e: Error) -> Self {
        let message = e.to_string();
        let (code, status) = match e {
            Error::Unauthenticated => {
                (errors::UNAUTHENTICATED, ClientErrorStatusCode::UNAUTHORIZED)
            }
            Error::NotFound(_) => (errors::NOT_FOUND, ClientErrorStatusCode::NOT_FOUND),
            Error::AlreadyExists(_) => {
                (errors::ALREADY_EXISTS, ClientErrorStatusCode::BAD_REQUEST)
            }
            Error::InvalidArgument(_) => {
                (errors::INVALID_ARGUMENT, ClientErrorStatusCode::BAD_REQUEST)
            }
            Error::NotAllowed(_) => (
                errors::NOT_ALLOWED_IN_CURRENT_STATE,
                ClientErrorStatusCode::BAD_REQUEST,
            ),
            Error::Unsupported(_) => {
                (errors::UNSUPPORTED, ClientErrorStatusCode::BAD_REQUEST)
            }
            Error::Inaccessible(_) => {
                (errors::RESOURCE_INACCESSIBLE, ClientErrorStatusCode::BAD_REQUEST)
            }
        };
        HttpError::for_client_error(Some(code.to_string()), status, message)
    }
}

pub type VapiResult<T> = std::result::Result<T, Error>;

pub struct Session {
    pub user: String,
    pub created: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    active: Instant,
}

/// State of every vAPI service.
#[derive(Default)]
pub struct State {
    pub sessions: BTreeMap<String, Session>,
    pub tags: tags::Store,
    pub library: library::Store,
    pub transfer: transfer::Store,
    pub modules: cluster::Store,
}

impl State {
    pub fn new(log: &Logger) -> Self {
        State {
            library: library::Store::new(log.new(o!("component" => "library"))),
            ..Default::default()
        }
    }

    /// Opens a session for `user`, returning its token.
    pub fn login(&mut self, user: &str) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        self.sessions.insert(
            token.clone(),
            Session {
                user: user.to_string(),
                created: now,
                last_accessed: now,
                active: Instant::now(),
            },
        );
        token
    }

    /// Validates the session `token`, dropping it once idle for longer
    /// than `timeout`, and returns the session's user.
    pub fn authenticate(
        &mut self,
        token: Option<&str>,
        timeout: Option<Duration>,
    ) -> VapiResult<String> {
        let token = token.ok_or(Error::Unauthenticated)?;
        let session = self.sessions.get_mut(token).ok_or(Error::Unauthenticated)?;
        if timeout.is_some_and(|t| session.active.elapsed() > t) {
            self.sessions.remove(token);
            return Err(Error::Unauthenticated);
        }
        session.active = Instant::now();
        session.last_accessed = Utc::now();
        Ok(session.user.clone())
    }
}

/// Decodes a JSON request body.
pub fn decode<T: DeserializeOwned>(body: &UntypedBody) -> VapiResult<T> {
    serde_json::from_slice(body.as_bytes())
        .map_err(|e| Error::InvalidArgument(e.to_string()))
}

/// Decodes a JSON request body, treating an empty body as the default.
pub fn decode_or_default<T: DeserializeOwned + Default>(
    body: &UntypedBody,
) -> VapiResult<T> {
    match body.as_bytes() {
        [] => Ok(T::default()),
        _ => decode(body),
    }
}

pub fn action(query: &ActionQuery) -> &str {
    query.action.as_deref().unwrap_or("")
}

pub fn unknown_action(action: &str) -> Error {
    Error::InvalidArgument(format!("action {action:?}"))
}

fn token(rqctx: &RequestContext<Arc<Context>>) -> Option<String> {
    crate::vim::session_header(rqctx)
}

/// Locks the vAPI state on behalf of the request's session.
pub async fn authorize(
    rqctx: &RequestContext<Arc<Context>>,
) -> VapiResult<tokio::sync::MutexGuard<'_, State>> {
    let ctx = rqctx.context();
    if !ctx.is_vcenter() {
        return Err(Error::NotFound("vAPI endpoint".into()));
    }
    let token = token(rqctx);
    let mut state = ctx.vapi.lock().await;
    state.authenticate(token.as_deref(), ctx.config.session.idle_timeout())?;
    Ok(state)
}

/// Extracts `user:password` from a Basic authorization header.
fn basic_credentials(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded =
        base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[endpoint {
    method = POST,
    path = "/api/session",
}]
pub async fn session_create(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseCreated<String>, HttpError> {
    let ctx = rqctx.context();
    if !ctx.is_vcenter() {
        return Err(Error::NotFound("vAPI endpoint".into()).into());
    }
    let credentials = rqctx
        .request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(basic_credentials);
    let Some((user, password)) = credentials else {
        return Err(Error::Unauthenticated.into());
    };
    if !ctx.config.auth.accepts(&user, &password) {
        return Err(Error::Unauthenticated.into());
    }
    let token = ctx.vapi.lock().await.login(&user);
    info!(rqctx.log, "vapi login"; "user" => &user);
    Ok(HttpResponseCreated(token))
}

#[endpoint {
    method = GET,
    path = "/api/session",
}]
pub async fn session_get(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<SessionInfo>, HttpError> {
    let state = authorize(&rqctx).await?;
    let token = token(&rqctx).unwrap_or_default();
    let session = state.sessions.get(&token).ok_or(Error::Unauthenticated)?;
    Ok(HttpResponseOk(SessionInfo {
        user: session.user.clone(),
        created_time: session.created,
        last_accessed_time: session.last_accessed,
    }))
}

#[endpoint {
    method = DELETE,
    path = "/api/session",
}]
pub async fn session_delete(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseDeleted, HttpError> {
    let mut state = authorize(&rqctx).await?;
    if let Some(token) = token(&rqctx) {
        state.sessions.remove(&token);
    }
    Ok(HttpResponseDeleted())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_header() {
        let header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("user:pa:ss")
        );
        assert_eq!(
            basic_credentials(&header),
            Some(("user".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(basic_credentials("Bearer abc"), None);
        assert_eq!(basic_credentials("Basic !!!"), None);
    }

    #[test]
    fn sessions_expire_when_idle() {
        let mut state = State::default();
        let token = state.login("user");
        assert_eq!(state.authenticate(Some(&token), None).unwrap(), "user");
        assert_eq!(
            state.authenticate(Some("bogus"), None),
            Err(Error::Unauthenticated)
        );
        assert_eq!(state.authenticate(None, None), Err(Error::Unauthenticated));

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            state.authenticate(Some(&token), Some(Duration::from_millis(1))),
            Err(Error::Unauthenticated)
        );
        assert!(state.sessions.is_empty());
    }

    #[test]
    fn errors_carry_vapi_codes() {
        let err = HttpError::from(Error::NotFound("tag".into()));
        assert_eq!(err.error_code.as_deref(), Some(errors::NOT_FOUND));
        assert_eq!(err.status_code.as_u16(), 404);

        let err = HttpError::from(Error::Unauthenticated);
        assert_eq!(err.status_code.as_u16(), 401);

        let err = HttpError::from(Error::AlreadyExists("x".into()));
        assert_eq!(err.error_code.as_deref(), Some(errors::ALREADY_EXISTS));
        assert_eq!(err.status_code.as_u16(), 400);
    }
}
