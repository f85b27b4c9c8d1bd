// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The VIM API over VI/JSON.
//!
//! Methods are invoked with `POST /sdk/vim25/{release}/{type}/{id}/{method}`
//! and properties read with `GET` on the same path. Every call runs with the
//! inventory lock held, except the property collector's update waits which
//! release it while blocked.

use std::sync::Arc;

use dropshot::{endpoint, HttpError, HttpResponseOk, Path, RequestContext, UntypedBody};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slog::{debug, Logger};
use vim_api_types::{LocalizedMethodFault, MethodFault, MoRef};

use crate::inventory::Inventory;
use crate::registry::ManagedObject;
use crate::Context;

pub mod compute;
pub mod entity;
pub mod event;
pub mod folder;
pub mod host;
pub mod option;
pub mod pool;
pub mod property;
pub mod search;
pub mod session;
pub mod snapshot;
pub mod task;
pub mod view;
pub mod vm;

pub type MethodResult = Result<Value, MethodFault>;

/// A method call being dispatched against the locked inventory.
pub struct Call<'a> {
    pub ctx: &'a Arc<Context>,
    pub inv: &'a mut Inventory,
    /// Key of the caller's session, if authenticated.
    pub session: Option<String>,
    pub peer: Option<String>,
    pub user_agent: Option<String>,
    pub log: &'a Logger,
}

impl Call<'_> {
    /// Name of the calling user.
    pub fn user(&self) -> String {
        self.session
            .as_deref()
            .and_then(|key| self.inv.sessions.get(key))
            .map(|s| s.user_name.clone())
            .unwrap_or_default()
    }
}

/// Decodes method parameters; an empty body decodes as `{}`.
pub fn decode<T: DeserializeOwned>(args: Value) -> Result<T, MethodFault> {
    let args = match args {
        Value::Null => Value::Object(Default::default()),
        args => args,
    };
    serde_json::from_value(args).map_err(|e| MethodFault::InvalidRequest {
        reason: e.to_string(),
    })
}

pub fn encode<T: Serialize>(value: &T) -> MethodResult {
    serde_json::to_value(value)
        .map_err(|e| MethodFault::system_error(e.to_string()))
}

pub fn method_not_found(this: &MoRef, method: &str) -> MethodFault {
    MethodFault::MethodNotFound {
        receiver: this.clone(),
        method: method.to_string(),
    }
}

/// Maps a fault onto the Dropshot error body.
pub fn fault_error(fault: MethodFault) -> HttpError {
    let code = fault.type_name().to_string();
    let body = LocalizedMethodFault::from(fault);
    let message = serde_json::to_string(&body)
        .unwrap_or_else(|_| body.localized_message.clone());
    HttpError::for_bad_request(Some(code), message)
}

/// Methods callable without a session.
fn anonymous(this: &MoRef, method: &str) -> bool {
    match this.kind.as_str() {
        "ServiceInstance" => {
            matches!(method, "RetrieveServiceContent" | "CurrentTime")
        }
        "SessionManager" => matches!(method, "Login" | "CloneSession"),
        _ => false,
    }
}

/// Checks that a singleton reference names the simulator's instance.
fn check_singleton(inv: &Inventory, this: &MoRef) -> Result<(), MethodFault> {
    match inv.is_singleton(this) {
        true => Ok(()),
        false => Err(MethodFault::not_found(this.clone())),
    }
}

/// Dispatches `method` on `this`.
pub fn invoke(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    if call.session.is_none() && !anonymous(this, method) {
        return Err(MethodFault::NotAuthenticated {
            object: this.clone(),
            privilege_id: "System.View".to_string(),
        });
    }

    if let Some(entity) = call.inv.registry.get(this).and_then(ManagedObject::entity)
    {
        if entity.disabled_method.iter().any(|m| m == method) {
            return Err(MethodFault::MethodDisabled { by: Some("vcsim".into()) });
        }
    }

    match this.kind.as_str() {
        "ServiceInstance" => {
            check_singleton(call.inv, this)?;
            match method {
                "RetrieveServiceContent" => encode(&call.inv.content),
                "CurrentTime" => encode(&chrono::Utc::now()),
                _ => Err(method_not_found(this, method)),
            }
        }
        "SessionManager" => {
            check_singleton(call.inv, this)?;
            session::dispatch(call, this, method, args)
        }
        "PropertyCollector" | "PropertyFilter" => {
            property::dispatch(call, this, method, args)
        }
        "ViewManager" => {
            check_singleton(call.inv, this)?;
            view::dispatch(call, this, method, args)
        }
        "ContainerView" | "ListView" => view::dispatch(call, this, method, args),
        "SearchIndex" => {
            check_singleton(call.inv, this)?;
            search::dispatch(call, this, method, args)
        }
        "TaskManager" => {
            check_singleton(call.inv, this)?;
            task::dispatch(call, this, method, args)
        }
        "Task" => task::dispatch(call, this, method, args),
        "EventManager" => {
            check_singleton(call.inv, this)?;
            event::dispatch(call, this, method, args)
        }
        "OptionManager" => {
            check_singleton(call.inv, this)?;
            option::dispatch(call, this, method, args)
        }
        _ => {
            call.inv.registry.lookup(this)?;
            match this.kind.as_str() {
                "Folder" => folder::dispatch(call, this, method, args),
                "ComputeResource" | "ClusterComputeResource" => {
                    compute::dispatch(call, this, method, args)
                }
                "HostSystem" => host::dispatch(call, this, method, args),
                "ResourcePool" => pool::dispatch(call, this, method, args),
                "VirtualMachine" => vm::dispatch(call, this, method, args),
                "VirtualMachineSnapshot" => {
                    snapshot::dispatch(call, this, method, args)
                }
                _ => entity::dispatch(call, this, method, args),
            }
        }
    }
}

/// Reads the property at `path` of `this`.
pub fn read_property(
    inv: &Inventory,
    session: Option<&str>,
    this: &MoRef,
    path: &str,
) -> MethodResult {
    if session.is_none() && this.kind != "ServiceInstance" {
        return Err(MethodFault::NotAuthenticated {
            object: this.clone(),
            privilege_id: "System.View".to_string(),
        });
    }
    let obj = property::object_value(inv, session, this)?
        .ok_or_else(|| MethodFault::not_found(this.clone()))?;
    match property::path::lookup(&this.kind, &obj, path)? {
        Some(value) => Ok(value),
        None => Ok(Value::Null),
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct MethodPath {
    pub release: String,
    pub mo_type: String,
    pub mo_id: String,
    pub name: String,
}

/// Returns the session key carried by the request, if any.
pub fn session_header(rqctx: &RequestContext<Arc<Context>>) -> Option<String> {
    rqctx
        .request
        .headers()
        .get(vim_api_types::SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[endpoint {
    method = POST,
    path = "/sdk/vim25/{release}/{mo_type}/{mo_id}/{name}",
}]
pub async fn vim_method(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<MethodPath>,
    body: UntypedBody,
) -> Result<HttpResponseOk<Value>, HttpError> {
    let ctx = rqctx.context();
    let path = path.into_inner();
    let this = MoRef::new(path.mo_type, path.mo_id);
    let method = path.name;
    let args: Value = match body.as_bytes() {
        [] => Value::Null,
        bytes => serde_json::from_slice(bytes)
            .map_err(|e| HttpError::for_bad_request(None, e.to_string()))?,
    };
    let key = session_header(&rqctx);
    debug!(rqctx.log, "vim call"; "this" => %this, "method" => &method);

    if !method.ends_with("_Task") {
        ctx.delay(&method).await;
    }

    if matches!(method.as_str(), "WaitForUpdatesEx" | "WaitForUpdates") {
        let result =
            property::wait::wait_for_updates(ctx, key, &this, &method, args)
                .await;
        return result.map(HttpResponseOk).map_err(fault_error);
    }

    let mut inv = ctx.inventory.lock().await;
    let session = key.filter(|k| inv.sessions.touch(k));
    let mut call = Call {
        ctx,
        inv: &mut *inv,
        session,
        peer: Some(rqctx.request.remote_addr().ip().to_string()),
        user_agent: rqctx
            .request
            .headers()
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        log: &rqctx.log,
    };
    invoke(&mut call, &this, &method, args)
        .map(HttpResponseOk)
        .map_err(fault_error)
}

#[endpoint {
    method = GET,
    path = "/sdk/vim25/{release}/{mo_type}/{mo_id}/{name}",
}]
pub async fn vim_property(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<MethodPath>,
) -> Result<HttpResponseOk<Value>, HttpError> {
    let ctx = rqctx.context();
    let path = path.into_inner();
    let this = MoRef::new(path.mo_type, path.mo_id);
    let key = session_header(&rqctx);

    let mut inv = ctx.inventory.lock().await;
    let session = key.filter(|k| inv.sessions.touch(k));
    read_property(&inv, session.as_deref(), &this, &path.name)
        .map(HttpResponseOk)
        .map_err(fault_error)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Drives the dispatcher directly, the way the endpoints do.

    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use slog::{o, Logger};
    use vim_api_types::MoRef;

    use super::{invoke, property, Call, MethodResult};
    use crate::vim::task::Outcome;
    use crate::Context;

    pub fn context_with(config: vcsim_config_toml::Config) -> Arc<Context> {
        Arc::new(Context::new(config, Logger::root(slog::Discard, o!())).unwrap())
    }

    pub fn context() -> Arc<Context> {
        context_with(Default::default())
    }

    pub async fn invoke_as(
        ctx: &Arc<Context>,
        key: Option<&str>,
        this: &MoRef,
        method: &str,
        args: Value,
    ) -> MethodResult {
        if matches!(method, "WaitForUpdatesEx" | "WaitForUpdates") {
            let key = key.map(str::to_string);
            return property::wait::wait_for_updates(ctx, key, this, method, args)
                .await;
        }
        let log = Logger::root(slog::Discard, o!());
        let mut inv = ctx.inventory.lock().await;
        let session = key.map(str::to_string).filter(|k| inv.sessions.touch(k));
        let mut call = Call {
            ctx,
            inv: &mut *inv,
            session,
            peer: Some("127.0.0.1".to_string()),
            user_agent: None,
            log: &log,
        };
        invoke(&mut call, this, method, args)
    }

    /// Logs in with the default credentials, returning the session key.
    pub async fn login(ctx: &Arc<Context>) -> String {
        let sm = MoRef::new("SessionManager", crate::inventory::SESSION_MANAGER);
        let session = invoke_as(
            ctx,
            None,
            &sm,
            "Login",
            json!({"userName": "user", "password": "pass"}),
        )
        .await
        .unwrap();
        session["key"].as_str().unwrap().to_string()
    }

    /// Waits for the task returned by a `*_Task` method to finish.
    pub async fn wait_task(ctx: &Arc<Context>, task: &Value) -> Outcome {
        let task: MoRef = serde_json::from_value(task.clone()).unwrap();
        loop {
            {
                let inv = ctx.inventory.lock().await;
                let info = &inv.registry.task(&task).unwrap().info;
                if info.state.is_done() {
                    return match &info.error {
                        Some(e) => Err(e.fault.clone()),
                        None => Ok(info.result.clone()),
                    };
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Runs a task method to completion.
    pub async fn run_task(
        ctx: &Arc<Context>,
        key: &str,
        this: &MoRef,
        method: &str,
        args: Value,
    ) -> Outcome {
        let task = invoke_as(ctx, Some(key), this, method, args).await?;
        wait_task(ctx, &task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vim_api_types::methods::LoginRequest;

    #[test]
    fn decode_empty_body() {
        let req: vim_api_types::methods::PowerOnVmRequest =
            decode(Value::Null).unwrap();
        assert!(req.host.is_none());

        let err = decode::<LoginRequest>(Value::Null).unwrap_err();
        assert!(matches!(err, MethodFault::InvalidRequest { .. }));
    }

    #[test]
    fn fault_error_carries_type_name() {
        let err = fault_error(MethodFault::InvalidLogin);
        assert_eq!(err.error_code.as_deref(), Some("InvalidLogin"));
        let body: LocalizedMethodFault =
            serde_json::from_str(&err.external_message).unwrap();
        assert_eq!(body.fault, MethodFault::InvalidLogin);
    }

    #[test]
    fn anonymous_methods() {
        let si = crate::inventory::service_instance();
        assert!(anonymous(&si, "RetrieveServiceContent"));
        assert!(!anonymous(&si, "Login"));
        let sm = MoRef::new("SessionManager", "SessionManager");
        assert!(anonymous(&sm, "Login"));
        assert!(!anonymous(&sm, "Logout"));
    }
}
