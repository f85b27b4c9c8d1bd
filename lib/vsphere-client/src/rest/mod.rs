// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! vAPI REST client.
//!
//! The vAPI services live under `/api` on a vCenter endpoint and carry
//! their own session, created with basic authentication and presented in
//! the `vmware-api-session-id` header.

use std::sync::{Arc, Mutex};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use slog::{debug, info, Logger};
use vim_api_types::vapi::{errors, SessionInfo};
use vim_api_types::SESSION_HEADER;

use crate::{json, vim25, Error, Result};

pub mod cluster;
pub mod library;
pub mod tags;
pub mod vcenter;

struct Inner {
    http: reqwest::Client,
    url: String,
    session: Mutex<Option<String>>,
    log: Logger,
}

/// A vAPI client. Clones share the session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// A client for the vAPI services of the endpoint `vim` is connected
    /// to. It starts without a session.
    pub fn new(vim: &vim25::Client) -> Self {
        Client {
            inner: Arc::new(Inner {
                http: vim.http().clone(),
                url: vim.url().to_string(),
                session: Mutex::new(None),
                log: vim.log().clone(),
            }),
        }
    }

    /// Base URL of the endpoint.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub(crate) fn log(&self) -> &Logger {
        &self.inner.log
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session.lock().ok().and_then(|s| s.clone())
    }

    pub fn set_session_id(&self, id: Option<String>) {
        if let Ok(mut session) = self.inner.session.lock() {
            *session = id;
        }
    }

    /// Creates a session with basic authentication.
    pub async fn login(&self, user: &str, password: &str) -> Result<()> {
        let response = self
            .inner
            .http
            .post(format!("{}/api/session", self.inner.url))
            .basic_auth(user, Some(password))
            .send()
            .await?;
        let token: String = json(response).await?;
        self.set_session_id(Some(token));
        info!(self.inner.log, "vapi login"; "user" => user);
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.delete("/api/session").await?;
        self.set_session_id(None);
        Ok(())
    }

    /// The current session, or `None` if the client has none or it
    /// expired.
    pub async fn session(&self) -> Result<Option<SessionInfo>> {
        if self.session_id().is_none() {
            return Ok(None);
        }
        match self.get("/api/session", &[]).await {
            Ok(info) => Ok(Some(info)),
            Err(e) if e.code() == Some(errors::UNAUTHENTICATED) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn tags(&self) -> tags::Manager {
        tags::Manager::new(self)
    }

    pub fn library(&self) -> library::Manager {
        library::Manager::new(self)
    }

    pub fn cluster_modules(&self) -> cluster::Manager {
        cluster::Manager::new(self)
    }

    pub fn vcenter(&self) -> vcenter::Manager {
        vcenter::Manager::new(self)
    }

    /// A request to `path` on the endpoint, with the session attached.
    pub(crate) fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        debug!(self.inner.log, "vapi request"; "method" => %method, "path" => path);
        let request = self.inner.http.request(method, format!("{}{path}", self.inner.url));
        match self.session_id() {
            Some(id) => request.header(SESSION_HEADER, id),
            None => request,
        }
    }

    pub(crate) async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<R> {
        json(self.request(Method::GET, path).query(query).send().await?).await
    }

    /// Posts `body` to `path`, optionally as `?action=`.
    pub(crate) async fn post<A, R>(&self, path: &str, action: Option<&str>, body: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.request(Method::POST, path).json(body);
        if let Some(action) = action {
            request = request.query(&[("action", action)]);
        }
        json(request.send().await?).await
    }

    pub(crate) async fn patch<A: Serialize + ?Sized>(&self, path: &str, body: &A) -> Result<()> {
        json(self.request(Method::PATCH, path).json(body).send().await?).await
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<()> {
        json(self.request(Method::DELETE, path).send().await?).await
    }
}

/// Maps a vAPI `not_found` error to [`Error::NotFound`].
pub(crate) fn not_found<'a>(kind: &'static str, path: &'a str) -> impl FnOnce(Error) -> Error + 'a {
    move |e| {
        if e.code() == Some(errors::NOT_FOUND) {
            Error::NotFound { kind, path: path.to_string() }
        } else {
            e
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: &str) -> Error {
        Error::Api { status: 404, code: Some(code.to_string()), message: String::new() }
    }

    #[test]
    fn not_found_maps_only_not_found_codes() {
        let path = String::from("zone");
        let mapped = not_found("category", &path)(api(errors::NOT_FOUND));
        assert!(matches!(
            mapped,
            Error::NotFound { kind: "category", ref path } if path == "zone"
        ));

        let kept = not_found("category", &path)(api(errors::UNAUTHENTICATED));
        assert_eq!(kept.code(), Some(errors::UNAUTHENTICATED));
    }
}
