// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VIM sessions.

use std::time::Duration;

use slog::{info, warn};
use tokio::task::JoinHandle;
use vim_api_types::methods::{
    AcquireGenericServiceTicketRequest, CloneSessionRequest, LoginRequest,
    SessionIsActiveRequest, TerminateSessionRequest,
};
use vim_api_types::session::{
    SessionManagerGenericServiceTicket, SessionManagerServiceRequestSpec,
    UserSession,
};
use vim_api_types::{MethodFault, MoRef};

use crate::{vim25, Error, Result};

/// The `SessionManager` of an endpoint.
#[derive(Clone)]
pub struct Manager {
    client: vim25::Client,
    this: MoRef,
}

impl Manager {
    pub fn new(client: &vim25::Client) -> Result<Self> {
        let this = client
            .service_content()
            .session_manager
            .clone()
            .ok_or(Error::Unsupported("session manager"))?;
        Ok(Manager { client: client.clone(), this })
    }

    pub fn reference(&self) -> &MoRef {
        &self.this
    }

    /// Logs in and attaches the new session to the client.
    pub async fn login(&self, user: &str, password: &str) -> Result<UserSession> {
        let req = LoginRequest {
            user_name: user.to_string(),
            password: password.to_string(),
            locale: None,
        };
        let session: UserSession = self.client.invoke(&self.this, "Login", &req).await?;
        self.client.set_session_id(Some(session.key.clone()));
        info!(self.client.log(), "logged in"; "user" => user);
        Ok(session)
    }

    /// Ends the client's session.
    pub async fn logout(&self) -> Result<()> {
        self.client.call::<()>(&self.this, "Logout").await?;
        self.client.set_session_id(None);
        Ok(())
    }

    /// The client's session, or `None` if it is not authenticated.
    pub async fn user_session(&self) -> Result<Option<UserSession>> {
        match self.client.property(&self.this, "currentSession").await {
            Ok(session) => Ok(session),
            Err(e) if matches!(e.fault(), Some(MethodFault::NotAuthenticated { .. })) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Every active session on the endpoint.
    pub async fn session_list(&self) -> Result<Vec<UserSession>> {
        let list: Option<Vec<UserSession>> =
            self.client.property(&self.this, "sessionList").await?;
        Ok(list.unwrap_or_default())
    }

    pub async fn session_is_active(&self, id: &str, user: &str) -> Result<bool> {
        let req = SessionIsActiveRequest {
            session_id: id.to_string(),
            user_name: user.to_string(),
        };
        self.client.invoke(&self.this, "SessionIsActive", &req).await
    }

    /// A single-use ticket another client can exchange for a session of
    /// the same user.
    pub async fn acquire_clone_ticket(&self) -> Result<String> {
        self.client.call(&self.this, "AcquireCloneTicket").await
    }

    /// Exchanges `ticket` for a new session attached to the client.
    pub async fn clone_session(&self, ticket: &str) -> Result<UserSession> {
        let req = CloneSessionRequest { clone_ticket: ticket.to_string() };
        let session: UserSession =
            self.client.invoke(&self.this, "CloneSession", &req).await?;
        self.client.set_session_id(Some(session.key.clone()));
        Ok(session)
    }

    /// Terminates other sessions; the client's own session cannot be
    /// terminated this way.
    pub async fn terminate_session(&self, ids: &[String]) -> Result<()> {
        let req = TerminateSessionRequest { session_id: ids.to_vec() };
        self.client.invoke(&self.this, "TerminateSession", &req).await
    }

    pub async fn acquire_generic_service_ticket(
        &self,
        spec: SessionManagerServiceRequestSpec,
    ) -> Result<SessionManagerGenericServiceTicket> {
        let req = AcquireGenericServiceTicketRequest { spec };
        self.client.invoke(&self.this, "AcquireGenericServiceTicket", &req).await
    }

    pub async fn set_locale(&self, locale: &str) -> Result<()> {
        let req = serde_json::json!({ "locale": locale });
        self.client.invoke(&self.this, "SetLocale", &req).await
    }
}

/// Keeps the client's session from idling out by reading it on a
/// background task every `interval`, until dropped.
pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    pub fn start(manager: &Manager, interval: Duration) -> Self {
        let manager = manager.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let log = manager.client.log();
                match manager.user_session().await {
                    Ok(Some(_)) => {}
                    Ok(None) => warn!(log, "keep-alive: session is gone"),
                    Err(e) => warn!(log, "keep-alive failed"; "error" => %e),
                }
            }
        });
        KeepAlive { handle }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
