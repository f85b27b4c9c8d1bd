// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VI/JSON transport.
//!
//! Methods are posted to `/sdk/vim25/{release}/{type}/{id}/{method}` with
//! their parameters as the JSON body; properties are read with `GET` on the
//! same path. The session, once established, travels in the
//! `vmware-api-session-id` header.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use slog::{debug, Logger};
use vim_api_types::{MoRef, ServiceContent, API_RELEASE, SESSION_HEADER};

use crate::{json, segment, Result};

const SERVICE_INSTANCE: &str = "ServiceInstance";

struct Inner {
    http: reqwest::Client,
    url: String,
    release: String,
    session: Mutex<Option<String>>,
    content: ServiceContent,
    log: Logger,
}

/// A VIM API client. Clones share the connection and session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

/// Strips a trailing `/` and `/sdk` from an endpoint URL.
fn base_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    url.strip_suffix("/sdk").unwrap_or(url).to_string()
}

impl Client {
    /// Connects to `url` and retrieves the service content.
    pub async fn new(url: &str, log: Logger) -> Result<Self> {
        // Update waits may block for as long as the server allows, so
        // only the connect phase is bounded.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        let url = base_url(url);
        let this = MoRef::new(SERVICE_INSTANCE, SERVICE_INSTANCE);
        let response = http
            .post(endpoint(&url, API_RELEASE, &this, "RetrieveServiceContent"))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let content: ServiceContent = json(response).await?;
        debug!(log, "connected";
            "url" => &url,
            "api_type" => &content.about.api_type,
            "version" => &content.about.api_version);
        Ok(Client {
            inner: Arc::new(Inner {
                http,
                url,
                release: API_RELEASE.to_string(),
                session: Mutex::new(None),
                content,
                log,
            }),
        })
    }

    pub fn service_content(&self) -> &ServiceContent {
        &self.inner.content
    }

    pub fn is_vcenter(&self) -> bool {
        self.inner.content.is_vcenter()
    }

    /// Base URL of the endpoint, without the `/sdk` suffix.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub fn log(&self) -> &Logger {
        &self.inner.log
    }

    /// The session id attached to requests, if any.
    pub fn session_id(&self) -> Option<String> {
        self.inner.session.lock().ok().and_then(|s| s.clone())
    }

    pub fn set_session_id(&self, id: Option<String>) {
        if let Ok(mut session) = self.inner.session.lock() {
            *session = id;
        }
    }

    /// Adds the session header, if a session is attached.
    pub(crate) fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        match self.session_id() {
            Some(id) => request.header(SESSION_HEADER, id),
            None => request,
        }
    }

    /// Invokes `method` on `this`.
    pub async fn invoke<A, R>(&self, this: &MoRef, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(self.inner.log, "invoke"; "this" => %this, "method" => method);
        let url = endpoint(&self.inner.url, &self.inner.release, this, method);
        let request = self.authorize(self.inner.http.post(url).json(args));
        json(request.send().await?).await
    }

    /// Invokes a method that takes no parameters.
    pub async fn call<R: DeserializeOwned>(&self, this: &MoRef, method: &str) -> Result<R> {
        self.invoke(this, method, &serde_json::json!({})).await
    }

    /// Reads the property at `path` of `this`. Unset properties read as
    /// `null`.
    pub async fn property<R: DeserializeOwned>(&self, this: &MoRef, path: &str) -> Result<R> {
        let url = endpoint(&self.inner.url, &self.inner.release, this, path);
        let request = self.authorize(self.inner.http.get(url));
        json(request.send().await?).await
    }

    /// The server clock.
    pub async fn current_time(&self) -> Result<chrono::DateTime<chrono::Utc>> {
        let this = MoRef::new(SERVICE_INSTANCE, SERVICE_INSTANCE);
        self.call(&this, "CurrentTime").await
    }
}

fn endpoint(url: &str, release: &str, this: &MoRef, name: &str) -> String {
    format!(
        "{url}/sdk/vim25/{release}/{}/{}/{}",
        segment(&this.kind),
        segment(&this.value),
        segment(name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_urls() {
        assert_eq!(base_url("http://127.0.0.1:8989/sdk/"), "http://127.0.0.1:8989");
        assert_eq!(base_url("https://vc.example.com"), "https://vc.example.com");

        let vm = MoRef::new("VirtualMachine", "vm-42");
        assert_eq!(
            endpoint("http://h", "8.0.1.0", &vm, "PowerOnVM_Task"),
            "http://h/sdk/vim25/8.0.1.0/VirtualMachine/vm-42/PowerOnVM_Task"
        );
        let filter = MoRef::new("PropertyFilter", "session[s]f");
        assert_eq!(
            endpoint("http://h", "8.0.1.0", &filter, "DestroyPropertyFilter"),
            "http://h/sdk/vim25/8.0.1.0/PropertyFilter/session%5Bs%5Df/DestroyPropertyFilter"
        );
    }
}
