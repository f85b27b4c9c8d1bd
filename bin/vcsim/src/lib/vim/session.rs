// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `SessionManager`: login, logout, clone tickets and idle expiry.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use slog::info;
use tokio::time::Instant;
use vim_api_types::methods::{
    AcquireGenericServiceTicketRequest, CloneSessionRequest, LoginRequest,
    SessionIsActiveRequest, TerminateSessionRequest,
};
use vim_api_types::session::{SessionManagerGenericServiceTicket, UserSession};
use vim_api_types::{MethodFault, MoRef};

use super::{decode, encode, event, method_not_found, Call, MethodResult};
use crate::inventory::{Inventory, ScopedObject};
use crate::Context;

pub const DEFAULT_LOCALE: &str = "en_US";
pub const SUPPORTED_LOCALES: [&str; 5] = ["en_US", "de_DE", "fr_FR", "ja_JP", "zh_CN"];

struct Entry {
    session: UserSession,
    last_active: Instant,
}

/// Authenticated sessions and outstanding clone tickets.
#[derive(Default)]
pub struct Sessions {
    active: BTreeMap<String, Entry>,
    tickets: BTreeMap<String, UserSession>,
}

impl Sessions {
    pub fn get(&self, key: &str) -> Option<&UserSession> {
        self.active.get(key).map(|e| &e.session)
    }

    /// Records activity on `key`, returning false if no such session exists.
    pub fn touch(&mut self, key: &str) -> bool {
        match self.active.get_mut(key) {
            Some(entry) => {
                entry.last_active = Instant::now();
                entry.session.last_active_time = Utc::now();
                entry.session.call_count += 1;
                true
            }
            None => false,
        }
    }

    pub fn insert(&mut self, session: UserSession) {
        let entry = Entry { session, last_active: Instant::now() };
        self.active.insert(entry.session.key.clone(), entry);
    }

    pub fn list(&self) -> Vec<UserSession> {
        self.active.values().map(|e| e.session.clone()).collect()
    }

    pub fn last_active(&self, key: &str) -> Option<Instant> {
        self.active.get(key).map(|e| e.last_active)
    }

    fn remove(&mut self, key: &str) -> Option<UserSession> {
        self.active.remove(key).map(|e| e.session)
    }

    fn set_locale(&mut self, key: &str, locale: &str) {
        if let Some(entry) = self.active.get_mut(key) {
            entry.session.locale = locale.to_string();
            entry.session.message_locale = locale.to_string();
        }
    }
}

/// Removes a session together with the objects it owns.
pub fn remove_session(inv: &mut Inventory, key: &str) -> Option<UserSession> {
    let session = inv.sessions.remove(key)?;
    for scoped in inv.scoped.values() {
        if let (true, ScopedObject::Collector(c)) =
            (scoped.owner == key, &scoped.object)
        {
            c.cancel.notify_waiters();
        }
    }
    inv.drop_scoped(key);
    inv.registry.touch();
    Some(session)
}

/// Removes the session `key` once it has been idle for the configured
/// timeout.
pub fn watch_expiry(ctx: Arc<Context>, key: String) {
    let Some(timeout) = ctx.config.session.idle_timeout() else {
        return;
    };
    tokio::spawn(async move {
        let mut deadline = Instant::now() + timeout;
        loop {
            tokio::time::sleep_until(deadline).await;
            let mut inv = ctx.inventory.lock().await;
            match inv.sessions.last_active(&key) {
                None => return,
                Some(last) if last + timeout <= Instant::now() => {
                    if let Some(s) = remove_session(&mut inv, &key) {
                        info!(ctx.log, "session expired"; "user" => s.user_name);
                    }
                    return;
                }
                Some(last) => deadline = last + timeout,
            }
        }
    });
}

fn new_session(call: &Call<'_>, user: &str, locale: &str) -> UserSession {
    let now = Utc::now();
    UserSession {
        key: uuid::Uuid::new_v4().to_string(),
        user_name: user.to_string(),
        full_name: user.to_string(),
        login_time: now,
        last_active_time: now,
        locale: locale.to_string(),
        message_locale: locale.to_string(),
        extension_session: false,
        ip_address: call.peer.clone(),
        user_agent: call.user_agent.clone(),
        call_count: 0,
    }
}

fn start(call: &mut Call<'_>, session: UserSession) {
    let key = session.key.clone();
    call.inv.sessions.insert(session);
    call.inv.registry.touch();
    watch_expiry(call.ctx.clone(), key);
}

fn login(call: &mut Call<'_>, req: LoginRequest) -> MethodResult {
    if call.session.is_some()
        || !call.ctx.config.auth.accepts(&req.user_name, &req.password)
    {
        return Err(MethodFault::InvalidLogin);
    }
    let locale = req.locale.as_deref().unwrap_or(DEFAULT_LOCALE);
    let session = new_session(call, &req.user_name, locale);
    info!(call.log, "login"; "user" => &req.user_name);
    event::post(
        call.inv,
        "UserLoginSessionEvent",
        &req.user_name,
        None,
        format!("User {} logged in", req.user_name),
    );
    start(call, session.clone());
    encode(&session)
}

fn current(call: &Call<'_>) -> Result<UserSession, MethodFault> {
    call.session
        .as_deref()
        .and_then(|key| call.inv.sessions.get(key))
        .cloned()
        .ok_or(MethodFault::NotAuthenticated {
            object: MoRef::new("SessionManager", crate::inventory::SESSION_MANAGER),
            privilege_id: "System.View".into(),
        })
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    match method {
        "Login" => login(call, decode(args)?),
        "Logout" => {
            let session = current(call)?;
            remove_session(call.inv, &session.key);
            event::post(
                call.inv,
                "UserLogoutSessionEvent",
                &session.user_name,
                None,
                format!("User {} logged out", session.user_name),
            );
            Ok(Value::Null)
        }
        "TerminateSession" => {
            let req: TerminateSessionRequest = decode(args)?;
            let own = current(call)?.key;
            if req.session_id.iter().any(|id| *id == own) {
                return Err(MethodFault::invalid_argument("sessionId"));
            }
            for id in &req.session_id {
                remove_session(call.inv, id);
            }
            Ok(Value::Null)
        }
        "AcquireCloneTicket" => {
            let session = current(call)?;
            let ticket = uuid::Uuid::new_v4().to_string();
            call.inv.sessions.tickets.insert(ticket.clone(), session);
            Ok(Value::String(ticket))
        }
        "CloneSession" => {
            let req: CloneSessionRequest = decode(args)?;
            let Some(original) = call.inv.sessions.tickets.remove(&req.clone_ticket)
            else {
                return Err(MethodFault::InvalidLogin);
            };
            let mut session =
                new_session(call, &original.user_name, &original.locale);
            session.full_name = original.full_name;
            start(call, session.clone());
            encode(&session)
        }
        "SessionIsActive" => {
            let req: SessionIsActiveRequest = decode(args)?;
            let active = call
                .inv
                .sessions
                .get(&req.session_id)
                .is_some_and(|s| s.user_name == req.user_name);
            Ok(Value::Bool(active))
        }
        "AcquireGenericServiceTicket" => {
            let _req: AcquireGenericServiceTicketRequest = decode(args)?;
            current(call)?;
            let host_name = call
                .inv
                .settings
                .get("VirtualCenter.FQDN")
                .and_then(Value::as_str)
                .map(str::to_string);
            encode(&SessionManagerGenericServiceTicket {
                id: uuid::Uuid::new_v4().to_string(),
                host_name,
            })
        }
        "SetLocale" => {
            let locale = args
                .get("locale")
                .and_then(Value::as_str)
                .ok_or_else(|| MethodFault::invalid_argument("locale"))?
                .to_string();
            let key = current(call)?.key;
            call.inv.sessions.set_locale(&key, &locale);
            Ok(Value::Null)
        }
        _ => Err(method_not_found(this, method)),
    }
}

/// Properties of the `SessionManager` as seen by `session`.
pub fn properties(inv: &Inventory, session: Option<&str>) -> Value {
    let current = session.and_then(|key| inv.sessions.get(key));
    json!({
        "currentSession": current,
        "sessionList": inv.sessions.list(),
        "defaultLocale": DEFAULT_LOCALE,
        "supportedLocaleList": SUPPORTED_LOCALES,
        "message": Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::testing::{context, context_with, invoke_as, login};
    use std::time::Duration;

    fn sm() -> MoRef {
        MoRef::new("SessionManager", crate::inventory::SESSION_MANAGER)
    }

    #[tokio::test]
    async fn login_rules() {
        let ctx = context();
        let bad = invoke_as(
            &ctx,
            None,
            &sm(),
            "Login",
            json!({"userName": "user", "password": "wrong"}),
        )
        .await;
        assert_eq!(bad.unwrap_err(), MethodFault::InvalidLogin);

        let session = invoke_as(
            &ctx,
            None,
            &sm(),
            "Login",
            json!({"userName": "user", "password": "pass"}),
        )
        .await
        .unwrap();
        let key = session["key"].as_str().unwrap().to_string();
        assert_eq!(session["locale"], "en_US");

        // an authenticated caller cannot log in again
        let again = invoke_as(
            &ctx,
            Some(&key),
            &sm(),
            "Login",
            json!({"userName": "user", "password": "pass"}),
        )
        .await;
        assert_eq!(again.unwrap_err(), MethodFault::InvalidLogin);

        let terminate = invoke_as(
            &ctx,
            Some(&key),
            &sm(),
            "TerminateSession",
            json!({"sessionId": [key.clone()]}),
        )
        .await;
        assert!(matches!(
            terminate.unwrap_err(),
            MethodFault::InvalidArgument { .. }
        ));

        let inv = ctx.inventory.lock().await;
        let latest = inv.events.latest().unwrap();
        assert_eq!(latest.kind, "UserLoginSessionEvent");
        assert_eq!(latest.user_name, "user");
    }

    #[tokio::test]
    async fn clone_ticket_is_single_use() {
        let ctx = context();
        let key = crate::vim::testing::login(&ctx).await;
        let ticket =
            invoke_as(&ctx, Some(&key), &sm(), "AcquireCloneTicket", Value::Null)
                .await
                .unwrap();

        let clone = invoke_as(
            &ctx,
            None,
            &sm(),
            "CloneSession",
            json!({"cloneTicket": ticket}),
        )
        .await
        .unwrap();
        assert_eq!(clone["userName"], "user");
        assert_ne!(clone["key"], Value::String(key.clone()));

        let reuse = invoke_as(
            &ctx,
            None,
            &sm(),
            "CloneSession",
            json!({"cloneTicket": ticket}),
        )
        .await;
        assert_eq!(reuse.unwrap_err(), MethodFault::InvalidLogin);

        let active = invoke_as(
            &ctx,
            Some(&key),
            &sm(),
            "SessionIsActive",
            json!({"sessionID": clone["key"], "userName": "user"}),
        )
        .await
        .unwrap();
        assert_eq!(active, Value::Bool(true));
    }

    #[tokio::test]
    async fn logout_drops_session() {
        let ctx = context();
        let key = crate::vim::testing::login(&ctx).await;
        invoke_as(&ctx, Some(&key), &sm(), "Logout", Value::Null).await.unwrap();
        let inv = ctx.inventory.lock().await;
        assert!(inv.sessions.get(&key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire_with_their_objects() {
        let mut config = vcsim_config_toml::Config::default();
        config.session.idle_timeout_secs = 10;
        let ctx = context_with(config);
        let key = login(&ctx).await;

        let pc = MoRef::new("PropertyCollector", crate::inventory::PROPERTY_COLLECTOR);
        let collector = invoke_as(&ctx, Some(&key), &pc, "CreatePropertyCollector", Value::Null)
            .await
            .unwrap();
        let collector: MoRef = serde_json::from_value(collector).unwrap();
        let root = ctx.inventory.lock().await.registry.root_folder().clone();
        let views = MoRef::new("ViewManager", crate::inventory::VIEW_MANAGER);
        let view = invoke_as(
            &ctx,
            Some(&key),
            &views,
            "CreateContainerView",
            json!({"container": root, "type": ["ManagedEntity"], "recursive": true}),
        )
        .await
        .unwrap();
        let view: MoRef = serde_json::from_value(view).unwrap();

        // activity pushes the deadline out
        tokio::time::sleep(Duration::from_secs(6)).await;
        let args = json!({"sessionID": key.clone(), "userName": "user"});
        invoke_as(&ctx, Some(&key), &sm(), "SessionIsActive", args).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        {
            let inv = ctx.inventory.lock().await;
            assert!(inv.sessions.get(&key).is_some());
            assert!(inv.scoped.contains_key(&collector));
            assert!(inv.scoped.contains_key(&view));
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        let inv = ctx.inventory.lock().await;
        assert!(inv.sessions.get(&key).is_none());
        assert!(!inv.scoped.contains_key(&collector));
        assert!(!inv.scoped.contains_key(&view));
    }

    #[tokio::test]
    async fn set_locale_updates_session() {
        let ctx = context();
        let key = login(&ctx).await;
        invoke_as(&ctx, Some(&key), &sm(), "SetLocale", json!({"locale": "de_DE"}))
            .await
            .unwrap();
        let err = invoke_as(&ctx, Some(&key), &sm(), "SetLocale", Value::Null).await.unwrap_err();
        assert_eq!(err, MethodFault::invalid_argument("locale"));

        let inv = ctx.inventory.lock().await;
        let session = inv.sessions.get(&key).unwrap();
        assert_eq!(session.locale, "de_DE");
        assert_eq!(session.message_locale, "de_DE");
    }
}
