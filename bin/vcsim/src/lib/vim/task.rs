// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tasks and the `TaskManager`.
//!
//! A `*_Task` method validates its arguments, creates a running task and
//! hands the actual work to a spawned future. That future waits out the
//! configured task delay, takes the inventory lock and records the outcome
//! in `info`.

use chrono::Utc;
use serde_json::{json, Value};
use slog::debug;
use vim_api_types::methods::{
    CreateTaskRequest, SetTaskDescriptionRequest, SetTaskStateRequest,
    UpdateProgressRequest,
};
use vim_api_types::mo;
use vim_api_types::task::{TaskInfo, TaskInfoState, TaskReason};
use vim_api_types::{LocalizedMethodFault, MethodFault, MoRef};

use super::{decode, encode, method_not_found, Call, MethodResult};
use crate::inventory::Inventory;
use crate::registry::ManagedObject;

/// Outcome of a task's work: an optional result value or a fault.
pub type Outcome = Result<Option<Value>, MethodFault>;

/// Creates a task in the `queued` state.
pub fn create(
    inv: &mut Inventory,
    entity: &MoRef,
    name: &str,
    description_id: String,
    user: &str,
    cancelable: bool,
) -> MoRef {
    let task = inv.registry.new_ref("Task");
    let info = TaskInfo {
        key: task.value.clone(),
        task: task.clone(),
        name: Some(name.to_string()),
        description_id,
        description: None,
        entity: Some(entity.clone()),
        entity_name: inv.registry.name(entity).map(str::to_string),
        state: TaskInfoState::Queued,
        cancelled: false,
        cancelable,
        error: None,
        result: None,
        progress: None,
        reason: TaskReason::user(user),
        queue_time: Utc::now(),
        start_time: None,
        complete_time: None,
        event_chain_id: 0,
        activation_id: None,
    };
    inv.registry.insert(task.clone(), ManagedObject::Task(mo::Task { info }));
    if let Ok(e) = inv.registry.entity_mut(entity) {
        e.recent_task.push(task.clone());
    }
    inv.remember_task(task.clone());
    task
}

fn start(inv: &mut Inventory, task: &MoRef) {
    if let Ok(t) = inv.registry.task_mut(task) {
        t.info.state = TaskInfoState::Running;
        t.info.start_time = Some(Utc::now());
    }
}

/// Records the outcome of a task.
pub fn complete(inv: &mut Inventory, task: &MoRef, outcome: Outcome) {
    let Ok(t) = inv.registry.task_mut(task) else {
        return;
    };
    if t.info.state.is_done() {
        return;
    }
    t.info.complete_time = Some(Utc::now());
    match outcome {
        Ok(result) => {
            t.info.state = TaskInfoState::Success;
            t.info.result = result;
            t.info.progress = Some(100);
        }
        Err(fault) => {
            t.info.state = TaskInfoState::Error;
            t.info.error = Some(LocalizedMethodFault::from(fault));
        }
    }
    let entity = t.info.entity.clone();
    if let Some(entity) = entity {
        if let Ok(e) = inv.registry.entity_mut(&entity) {
            e.recent_task.retain(|r| r != task);
        }
    }
}

/// Starts a task named `method` on `entity` which runs `work` once the
/// caller has released the inventory lock.
pub fn run<F>(
    call: &mut Call<'_>,
    entity: &MoRef,
    method: &str,
    work: F,
) -> MethodResult
where
    F: FnOnce(&mut Inventory) -> Outcome + Send + 'static,
{
    let id = method.strip_suffix("_Task").unwrap_or(method);
    let description_id = format!("{}.{}", entity.kind, id);
    let user = call.user();
    let task = create(call.inv, entity, method, description_id, &user, false);
    start(call.inv, &task);

    let ctx = call.ctx.clone();
    let delay = ctx.jittered(method);
    let log = call.log.clone();
    let handle = task.clone();
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut inv = ctx.inventory.lock().await;
        let cancelled = inv
            .registry
            .task(&handle)
            .map(|t| t.info.state.is_done())
            .unwrap_or(true);
        if cancelled {
            return;
        }
        let outcome = work(&mut inv);
        debug!(log, "task complete"; "task" => %handle, "ok" => outcome.is_ok());
        complete(&mut inv, &handle, outcome);
    });
    encode(&task)
}

fn task_dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    let done = call.inv.registry.task(this)?.info.state.is_done();
    match method {
        "SetTaskState" => {
            let req: SetTaskStateRequest = decode(args)?;
            if done {
                return Err(MethodFault::InvalidState);
            }
            let t = call.inv.registry.task_mut(this)?;
            t.info.state = req.state;
            match req.state {
                TaskInfoState::Running => t.info.start_time = Some(Utc::now()),
                TaskInfoState::Success | TaskInfoState::Error => {
                    t.info.complete_time = Some(Utc::now());
                    if req.fault.is_some() {
                        t.info.error = req.fault;
                    }
                    if req.result.is_some() {
                        t.info.result = req.result;
                    }
                }
                TaskInfoState::Queued => {}
            }
            Ok(Value::Null)
        }
        "SetTaskDescription" => {
            let req: SetTaskDescriptionRequest = decode(args)?;
            if done {
                return Err(MethodFault::InvalidState);
            }
            call.inv.registry.task_mut(this)?.info.description =
                Some(req.description);
            Ok(Value::Null)
        }
        "UpdateProgress" => {
            let req: UpdateProgressRequest = decode(args)?;
            let t = call.inv.registry.task_mut(this)?;
            if t.info.state != TaskInfoState::Running {
                return Err(MethodFault::InvalidState);
            }
            t.info.progress = Some(req.percent_done);
            Ok(Value::Null)
        }
        "CancelTask" => {
            if done {
                return Err(MethodFault::InvalidState);
            }
            complete(call.inv, this, Err(MethodFault::RequestCanceled));
            call.inv.registry.task_mut(this)?.info.cancelled = true;
            Ok(Value::Null)
        }
        _ => Err(method_not_found(this, method)),
    }
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    if this.kind == "Task" {
        return task_dispatch(call, this, method, args);
    }
    match method {
        "CreateTask" => {
            let req: CreateTaskRequest = decode(args)?;
            call.inv.registry.lookup(&req.obj)?;
            let user = req.initiated_by.unwrap_or_else(|| call.user());
            let task = create(
                call.inv,
                &req.obj,
                &req.task_type_id,
                req.task_type_id.clone(),
                &user,
                req.cancelable,
            );
            let info = &call.inv.registry.task(&task)?.info;
            encode(info)
        }
        _ => Err(method_not_found(this, method)),
    }
}

pub fn properties(inv: &Inventory) -> Value {
    json!({
        "recentTask": inv.recent_tasks,
        "maxCollector": 32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::testing::{context, invoke_as, login};

    #[tokio::test]
    async fn externally_driven_task() {
        let ctx = context();
        let key = login(&ctx).await;
        let tm = MoRef::new("TaskManager", crate::inventory::TASK_MANAGER);
        let root = ctx.inventory.lock().await.registry.root_folder().clone();

        let info = invoke_as(
            &ctx,
            Some(&key),
            &tm,
            "CreateTask",
            json!({"obj": root, "taskTypeId": "com.example.Sync", "cancelable": true}),
        )
        .await
        .unwrap();
        assert_eq!(info["state"], "queued");
        let task: MoRef = serde_json::from_value(info["task"].clone()).unwrap();

        let progress = invoke_as(
            &ctx,
            Some(&key),
            &task,
            "UpdateProgress",
            json!({"percentDone": 10}),
        )
        .await;
        assert_eq!(progress.unwrap_err(), MethodFault::InvalidState);

        invoke_as(&ctx, Some(&key), &task, "SetTaskState", json!({"state": "running"}))
            .await
            .unwrap();
        invoke_as(&ctx, Some(&key), &task, "UpdateProgress", json!({"percentDone": 50}))
            .await
            .unwrap();
        invoke_as(&ctx, Some(&key), &task, "CancelTask", Value::Null).await.unwrap();

        let again = invoke_as(&ctx, Some(&key), &task, "CancelTask", Value::Null).await;
        assert_eq!(again.unwrap_err(), MethodFault::InvalidState);

        let inv = ctx.inventory.lock().await;
        let info = &inv.registry.task(&task).unwrap().info;
        assert_eq!(info.state, TaskInfoState::Error);
        assert!(info.cancelled);
        assert_eq!(
            info.error.as_ref().map(|e| &e.fault),
            Some(&MethodFault::RequestCanceled)
        );
        assert!(inv.recent_tasks.contains(&task));
    }
}
