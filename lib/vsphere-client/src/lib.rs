// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A client for the vSphere APIs: the VIM API over VI/JSON, the vAPI REST
//! services, the lookup service and SSO administration.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use slog::Logger;
use thiserror::Error;
use vim_api_types::session::UserSession;
use vim_api_types::{LocalizedMethodFault, MethodFault};

pub mod find;
pub mod lookup;
pub mod object;
pub mod property;
pub mod rest;
pub mod session;
pub mod ssoadmin;
pub mod task;
pub mod view;
pub mod vim25;

// Re-exported so consumers can name wire types without a separate
// dependency kept in lockstep with this crate.
pub use vim_api_types as types;

#[derive(Debug, Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),

    /// A VIM method or task failed with a fault.
    #[error("{0}")]
    Fault(Box<LocalizedMethodFault>),

    /// A vAPI, lookup or SSO admin request was rejected.
    #[error("{status} {}: {message}", code.as_deref().unwrap_or("error"))]
    Api { status: u16, code: Option<String>, message: String },

    #[error("{kind} '{path}' not found")]
    NotFound { kind: &'static str, path: String },

    #[error("path '{path}' resolves to multiple {kind}s")]
    Multiple { kind: &'static str, path: String },

    #[error("the endpoint does not provide a {0}")]
    Unsupported(&'static str),

    #[error("no session")]
    NoSession,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl Error {
    /// The VIM fault carried by this error, if any.
    pub fn fault(&self) -> Option<&MethodFault> {
        match self {
            Error::Fault(f) => Some(&f.fault),
            _ => None,
        }
    }

    /// The error code of a rejected REST request.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The HTTP status of a rejected REST request.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: String,
}

fn error_from(status: u16, body: &[u8]) -> Error {
    let Ok(body) = serde_json::from_slice::<ErrorBody>(body) else {
        return Error::Api {
            status,
            code: None,
            message: String::from_utf8_lossy(body).into_owned(),
        };
    };
    // VIM faults travel as the serialized fault in the message.
    if let Ok(fault) = serde_json::from_str::<LocalizedMethodFault>(&body.message)
    {
        return Error::Fault(Box::new(fault));
    }
    Error::Api { status, code: body.error_code, message: body.message }
}

/// Turns a non-success response into an error.
pub(crate) async fn check(
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await?;
    Err(error_from(status.as_u16(), &body))
}

/// Decodes a JSON response body; an empty body decodes as `null`.
pub(crate) async fn json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T> {
    let body = check(response).await?.bytes().await?;
    match body.as_ref() {
        [] => Ok(serde_json::from_slice(b"null")?),
        body => Ok(serde_json::from_slice(body)?),
    }
}

const SEGMENT: &AsciiSet =
    &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Escapes one URL path segment.
pub(crate) fn segment(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

/// A connection to a vCenter or ESXi endpoint.
#[derive(Clone)]
pub struct Client {
    vim: vim25::Client,
}

impl Client {
    /// Connects to the endpoint at `url`, such as `https://vc.example.com`
    /// or its `/sdk` URL.
    pub async fn new(url: &str, log: Logger) -> Result<Self> {
        Ok(Client { vim: vim25::Client::new(url, log).await? })
    }

    /// Logs in, attaching the new session to this client.
    pub async fn login(&self, user: &str, password: &str) -> Result<UserSession> {
        self.session_manager()?.login(user, password).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.session_manager()?.logout().await
    }

    pub fn vim25(&self) -> &vim25::Client {
        &self.vim
    }

    pub fn session_manager(&self) -> Result<session::Manager> {
        session::Manager::new(&self.vim)
    }

    pub fn property_collector(&self) -> property::Collector {
        property::Collector::new(&self.vim)
    }

    pub fn view_manager(&self) -> Result<view::Manager> {
        view::Manager::new(&self.vim)
    }

    pub fn finder(&self) -> find::Finder {
        find::Finder::new(&self.vim)
    }

    /// A vAPI client on the same endpoint, with its own session.
    pub fn rest(&self) -> rest::Client {
        rest::Client::new(&self.vim)
    }

    pub fn lookup(&self) -> lookup::Client {
        lookup::Client::new(&self.vim)
    }

    /// An SSO admin client authenticated by this client's session.
    pub fn ssoadmin(&self) -> ssoadmin::Client {
        ssoadmin::Client::new(&self.vim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn faults_are_decoded_from_error_bodies() {
        let fault = LocalizedMethodFault::from(MethodFault::InvalidLogin);
        let body = json!({
            "request_id": "r1",
            "error_code": "InvalidLogin",
            "message": serde_json::to_string(&fault).unwrap(),
        });
        let err = error_from(400, body.to_string().as_bytes());
        assert_eq!(err.fault(), Some(&MethodFault::InvalidLogin));
        assert_eq!(err.code(), None);
    }

    #[test]
    fn api_errors_keep_their_code() {
        let body = json!({
            "request_id": "r2",
            "error_code": "com.vmware.vapi.std.errors.not_found",
            "message": "not found: tag",
        });
        let err = error_from(404, body.to_string().as_bytes());
        assert_eq!(err.code(), Some("com.vmware.vapi.std.errors.not_found"));
        assert_eq!(err.status(), Some(404));
        assert!(err.fault().is_none());

        let err = error_from(502, b"bad gateway");
        assert!(matches!(err, Error::Api { status: 502, code: None, .. }));
    }

    #[test]
    fn segments_are_escaped() {
        assert_eq!(segment("vm-42"), "vm-42");
        assert_eq!(segment("user@vsphere.local"), "user%40vsphere.local");
        assert_eq!(segment("session[a]b"), "session%5Ba%5Db");
        assert_eq!(segment("disk 1.vmdk"), "disk%201.vmdk");
    }
}
