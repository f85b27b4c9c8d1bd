// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Incremental updates: `WaitForUpdatesEx`, `WaitForUpdates` and
//! `CheckForUpdates`.
//!
//! Each filter remembers the properties it last reported per object. An
//! update set is the diff between that snapshot and a fresh collection.
//! When nothing changed the wait parks on the registry's generation counter
//! with the inventory lock released.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use vim_api_types::methods::WaitForUpdatesExRequest;
use vim_api_types::property::{
    ObjectContent, ObjectUpdate, ObjectUpdateKind, PropertyChange,
    PropertyChangeOp, PropertyFilterUpdate, UpdateSet,
};
use vim_api_types::{MethodFault, MoRef};

use super::{collect, collector_mut, resolve, snapshot, Missing, Snapshot};
use crate::inventory::{Inventory, ScopedObject};
use crate::vim::{decode, encode, MethodResult};
use crate::Context;

/// Ceiling and default of `maxObjectUpdates`.
pub const MAX_OBJECT_UPDATES: usize = 100;

fn changes(old: &Snapshot, new: &Snapshot) -> Vec<PropertyChange> {
    let mut out: Vec<PropertyChange> = new
        .iter()
        .filter(|(name, val)| old.get(*name) != Some(*val))
        .map(|(name, val)| PropertyChange {
            name: name.clone(),
            op: PropertyChangeOp::Assign,
            val: Some(val.clone()),
        })
        .collect();
    out.extend(old.keys().filter(|name| !new.contains_key(*name)).map(|name| {
        PropertyChange { name: name.clone(), op: PropertyChangeOp::Remove, val: None }
    }));
    out
}

fn object_update(
    content: &ObjectContent,
    previous: Option<&Snapshot>,
    current: &Snapshot,
) -> Option<ObjectUpdate> {
    let (kind, change_set) = match previous {
        None => (ObjectUpdateKind::Enter, changes(&Snapshot::new(), current)),
        Some(old) => match changes(old, current) {
            c if c.is_empty() => return None,
            c => (ObjectUpdateKind::Modify, c),
        },
    };
    Some(ObjectUpdate {
        kind,
        obj: content.obj.clone(),
        change_set,
        missing_set: match previous {
            None => content.missing_set.clone(),
            Some(_) => Vec::new(),
        },
    })
}

/// Computes the next update set of collector `pc`, or `None` if nothing
/// changed since the last one. With `reset`, every filter starts over and
/// reports all of its objects as entering.
pub fn updates(
    inv: &mut Inventory,
    session: &str,
    pc: &MoRef,
    reset: bool,
    limit: usize,
) -> Result<Option<UpdateSet>, MethodFault> {
    let filters = collector_mut(inv, session, pc)?.filters.clone();
    let mut budget = limit;
    let mut truncated = false;
    let mut filter_set = Vec::new();

    for f in filters {
        let (spec, mut reported) = match inv.scoped_mut(Some(session), &f) {
            Ok(ScopedObject::Filter(filter)) => {
                if reset {
                    filter.reported.clear();
                }
                (filter.spec.clone(), std::mem::take(&mut filter.reported))
            }
            _ => continue,
        };
        let current = collect(inv, Some(session), &spec, Missing::Skip);

        let mut object_set = Vec::new();
        if let Ok(current) = &current {
            let mut present = BTreeSet::new();
            for content in current {
                present.insert(content.obj.clone());
                let snap = snapshot(content);
                let Some(update) =
                    object_update(content, reported.get(&content.obj), &snap)
                else {
                    continue;
                };
                if budget == 0 {
                    truncated = true;
                    break;
                }
                budget -= 1;
                object_set.push(update);
                reported.insert(content.obj.clone(), snap);
            }
            let gone: Vec<MoRef> = reported
                .keys()
                .filter(|r| !present.contains(*r))
                .cloned()
                .collect();
            for obj in gone {
                if truncated {
                    break;
                }
                if budget == 0 {
                    truncated = true;
                    break;
                }
                budget -= 1;
                reported.remove(&obj);
                object_set.push(ObjectUpdate {
                    kind: ObjectUpdateKind::Leave,
                    obj,
                    change_set: Vec::new(),
                    missing_set: Vec::new(),
                });
            }
        }

        if let Ok(ScopedObject::Filter(filter)) = inv.scoped_mut(Some(session), &f)
        {
            filter.reported = reported;
        }
        current?;
        if !object_set.is_empty() {
            filter_set.push(PropertyFilterUpdate { filter: f, object_set });
        }
    }

    if filter_set.is_empty() {
        return Ok(None);
    }
    let collector = collector_mut(inv, session, pc)?;
    collector.version += 1;
    Ok(Some(UpdateSet {
        version: collector.version.to_string(),
        filter_set,
        truncated: truncated.then_some(true),
    }))
}

/// Number of object updates a caller asked for, within the ceiling.
pub fn limit(max_object_updates: Option<i32>) -> usize {
    max_object_updates
        .filter(|n| *n > 0)
        .map_or(MAX_OBJECT_UPDATES, |n| (n as usize).min(MAX_OBJECT_UPDATES))
}

pub fn is_reset(version: Option<&str>) -> bool {
    version.map_or(true, str::is_empty)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Waits for the next update set of the caller's collector `this`.
///
/// `WaitForUpdates` ignores `maxWaitSeconds` and waits indefinitely.
pub async fn wait_for_updates(
    ctx: &Arc<Context>,
    key: Option<String>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    let req: WaitForUpdatesExRequest = decode(args)?;
    let options = req.options.unwrap_or_default();
    let max_wait = match method {
        "WaitForUpdates" => None,
        _ => options.max_wait_seconds,
    };
    let limit = limit(options.max_object_updates);
    let deadline = max_wait
        .map(|secs| Instant::now() + Duration::from_secs(secs.max(0) as u64));
    let mut reset = is_reset(req.version.as_deref());

    let (session, pc, cancel, mut generation) = {
        let mut inv = ctx.inventory.lock().await;
        let Some(session) = key.filter(|k| inv.sessions.touch(k)) else {
            return Err(MethodFault::NotAuthenticated {
                object: this.clone(),
                privilege_id: "System.View".to_string(),
            });
        };
        let pc = resolve(&mut inv, &session, this)?;
        let cancel = collector_mut(&mut inv, &session, &pc)?.cancel.clone();
        (session, pc, cancel, inv.registry.subscribe())
    };

    loop {
        let cancelled = cancel.notified();
        {
            let mut inv = ctx.inventory.lock().await;
            generation.borrow_and_update();
            if let Some(set) = updates(&mut inv, &session, &pc, reset, limit)? {
                return encode(&set);
            }
        }
        reset = false;
        if deadline.is_some_and(|d| d <= Instant::now()) {
            return Ok(Value::Null);
        }
        tokio::select! {
            _ = cancelled => return Err(MethodFault::RequestCanceled),
            changed = generation.changed() => {
                if changed.is_err() {
                    return Ok(Value::Null);
                }
            }
            _ = sleep_until(deadline) => return Ok(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory;
    use crate::vim::testing::{context, invoke_as, login, wait_task};
    use serde_json::json;
    use vim_api_types::property::{ObjectSpec, PropertyFilterSpec, PropertySpec};

    fn pc() -> MoRef {
        MoRef::new("PropertyCollector", inventory::PROPERTY_COLLECTOR)
    }

    #[test]
    fn property_changes() {
        let old: Snapshot =
            [("a".to_string(), json!(1)), ("b".to_string(), json!(2))].into();
        let new: Snapshot =
            [("a".to_string(), json!(1)), ("c".to_string(), json!(3))].into();
        let c = changes(&old, &new);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].name, "c");
        assert_eq!(c[0].op, PropertyChangeOp::Assign);
        assert_eq!(c[1].name, "b");
        assert_eq!(c[1].op, PropertyChangeOp::Remove);
        assert!(c[1].val.is_none());
    }

    #[test]
    fn update_limits() {
        assert_eq!(limit(None), MAX_OBJECT_UPDATES);
        assert_eq!(limit(Some(0)), MAX_OBJECT_UPDATES);
        assert_eq!(limit(Some(5)), 5);
        assert_eq!(limit(Some(5000)), MAX_OBJECT_UPDATES);
        assert!(is_reset(None));
        assert!(is_reset(Some("")));
        assert!(!is_reset(Some("1")));
    }

    async fn wait(ctx: &Arc<Context>, key: &str, version: &str, max_wait: i32) -> Value {
        wait_for_updates(
            ctx,
            Some(key.to_string()),
            &pc(),
            "WaitForUpdatesEx",
            json!({"version": version, "options": {"maxWaitSeconds": max_wait}}),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn enter_modify_and_timeout() {
        let ctx = context();
        let key = login(&ctx).await;
        let vm = ctx.inventory.lock().await.registry.all_of("VirtualMachine")[0].clone();
        let spec = PropertyFilterSpec {
            prop_set: vec![PropertySpec::new("VirtualMachine", &["runtime.powerState"])],
            object_set: vec![ObjectSpec::new(vm.clone())],
            report_missing_objects_in_results: None,
        };
        invoke_as(&ctx, Some(&key), &pc(), "CreateFilter", json!({"spec": spec}))
            .await
            .unwrap();

        let first: UpdateSet =
            serde_json::from_value(wait(&ctx, &key, "", 0).await).unwrap();
        let update = &first.filter_set[0].object_set[0];
        assert_eq!(update.kind, ObjectUpdateKind::Enter);
        assert_eq!(update.change_set[0].val, Some(json!("poweredOn")));

        // nothing changed
        assert_eq!(wait(&ctx, &key, &first.version, 0).await, Value::Null);

        let task =
            invoke_as(&ctx, Some(&key), &vm, "PowerOffVM_Task", Value::Null).await.unwrap();
        wait_task(&ctx, &task).await.unwrap();

        let next: UpdateSet =
            serde_json::from_value(wait(&ctx, &key, &first.version, 1).await).unwrap();
        assert_ne!(next.version, first.version);
        let update = &next.filter_set[0].object_set[0];
        assert_eq!(update.kind, ObjectUpdateKind::Modify);
        assert_eq!(update.change_set[0].name, "runtime.powerState");
        assert_eq!(update.change_set[0].val, Some(json!("poweredOff")));
    }

    #[tokio::test]
    async fn truncated_sets_resume() {
        let ctx = context();
        let key = login(&ctx).await;
        let vms = ctx.inventory.lock().await.registry.all_of("VirtualMachine");
        assert!(vms.len() > 1);
        let spec = PropertyFilterSpec {
            prop_set: vec![PropertySpec::new("VirtualMachine", &["name"])],
            object_set: vms.iter().cloned().map(ObjectSpec::new).collect(),
            report_missing_objects_in_results: None,
        };
        invoke_as(&ctx, Some(&key), &pc(), "CreateFilter", json!({"spec": spec}))
            .await
            .unwrap();

        let mut seen = 0;
        let mut version = String::new();
        loop {
            let set = wait_for_updates(
                &ctx,
                Some(key.clone()),
                &pc(),
                "WaitForUpdatesEx",
                json!({"version": version, "options": {"maxWaitSeconds": 0, "maxObjectUpdates": 1}}),
            )
            .await
            .unwrap();
            if set.is_null() {
                break;
            }
            let set: UpdateSet = serde_json::from_value(set).unwrap();
            assert_eq!(set.filter_set[0].object_set.len(), 1);
            seen += 1;
            assert_eq!(set.truncated == Some(true), seen < vms.len());
            version = set.version;
        }
        assert_eq!(seen, vms.len());
    }

    #[tokio::test]
    async fn cancel_wakes_waiter() {
        let ctx = context();
        let key = login(&ctx).await;
        let root = ctx.inventory.lock().await.registry.root_folder().clone();
        let spec = PropertyFilterSpec {
            prop_set: vec![PropertySpec::new("Folder", &["name"])],
            object_set: vec![ObjectSpec::new(root)],
            report_missing_objects_in_results: None,
        };
        invoke_as(&ctx, Some(&key), &pc(), "CreateFilter", json!({"spec": spec}))
            .await
            .unwrap();
        let first: UpdateSet =
            serde_json::from_value(wait(&ctx, &key, "", 0).await).unwrap();

        let waiter = {
            let ctx = ctx.clone();
            let key = key.clone();
            tokio::spawn(async move {
                wait_for_updates(
                    &ctx,
                    Some(key),
                    &pc(),
                    "WaitForUpdates",
                    json!({"version": first.version}),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        invoke_as(&ctx, Some(&key), &pc(), "CancelWaitForUpdates", Value::Null)
            .await
            .unwrap();
        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap_err(), MethodFault::RequestCanceled);
    }
}
