// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `VirtualMachineSnapshot` and the snapshot tree of a virtual machine.
//!
//! The tree in `VirtualMachine.snapshot` is authoritative; the machine's
//! `rootSnapshot` and each snapshot's `childSnapshot` are derived from it
//! by [`sync`].

use chrono::Utc;
use serde_json::Value;
use vim_api_types::methods::{CreateSnapshotRequest, RemoveSnapshotRequest, RenameSnapshotRequest};
use vim_api_types::mo::{
    VirtualMachinePowerState, VirtualMachineSnapshot, VirtualMachineSnapshotInfo,
    VirtualMachineSnapshotTree,
};
use vim_api_types::{MethodFault, MoRef};

use super::task::{self, Outcome};
use super::{decode, method_not_found, vm, Call, MethodResult};
use crate::inventory::Inventory;
use crate::registry::ManagedObject;

type Tree = VirtualMachineSnapshotTree;

fn find<'a>(list: &'a [Tree], s: &MoRef) -> Option<&'a Tree> {
    list.iter().find_map(|t| match &t.snapshot == s {
        true => Some(t),
        false => find(&t.child_snapshot_list, s),
    })
}

fn find_mut<'a>(list: &'a mut [Tree], s: &MoRef) -> Option<&'a mut Tree> {
    for t in list {
        if &t.snapshot == s {
            return Some(t);
        }
        if let Some(found) = find_mut(&mut t.child_snapshot_list, s) {
            return Some(found);
        }
    }
    None
}

/// Parent of `s`; `Some(None)` when `s` is a root.
fn parent_of(list: &[Tree], s: &MoRef) -> Option<Option<MoRef>> {
    if list.iter().any(|t| &t.snapshot == s) {
        return Some(None);
    }
    list.iter().find_map(|t| {
        if t.child_snapshot_list.iter().any(|c| &c.snapshot == s) {
            Some(Some(t.snapshot.clone()))
        } else {
            parent_of(&t.child_snapshot_list, s)
        }
    })
}

/// Removes `s` from the tree, moving its children into its place when
/// `keep_children` is set.
fn detach(list: &mut Vec<Tree>, s: &MoRef, keep_children: bool) -> Option<Tree> {
    if let Some(i) = list.iter().position(|t| &t.snapshot == s) {
        let node = list.remove(i);
        if keep_children {
            for (k, child) in node.child_snapshot_list.iter().cloned().enumerate() {
                list.insert(i + k, child);
            }
        }
        return Some(node);
    }
    list.iter_mut()
        .find_map(|t| detach(&mut t.child_snapshot_list, s, keep_children))
}

fn collect(tree: &Tree, out: &mut Vec<MoRef>) {
    out.push(tree.snapshot.clone());
    for c in &tree.child_snapshot_list {
        collect(c, out);
    }
}

fn max_id(list: &[Tree]) -> i32 {
    list.iter()
        .map(|t| t.id.max(max_id(&t.child_snapshot_list)))
        .max()
        .unwrap_or(0)
}

/// Rebuilds `rootSnapshot` and `childSnapshot` from the tree of `vm`.
fn sync(inv: &mut Inventory, vm: &MoRef) -> Result<(), MethodFault> {
    fn edges(list: &[Tree], out: &mut Vec<(MoRef, Vec<MoRef>)>) {
        for t in list {
            let children = t.child_snapshot_list.iter().map(|c| c.snapshot.clone()).collect();
            out.push((t.snapshot.clone(), children));
            edges(&t.child_snapshot_list, out);
        }
    }

    let machine = inv.registry.vm_mut(vm)?;
    if machine.snapshot.as_ref().is_some_and(|s| s.root_snapshot_list.is_empty()) {
        machine.snapshot = None;
    }
    let roots = machine.snapshot.as_ref().map(|s| s.root_snapshot_list.as_slice()).unwrap_or(&[]);
    let mut links = Vec::new();
    edges(roots, &mut links);
    machine.root_snapshot = roots.iter().map(|t| t.snapshot.clone()).collect();
    for (s, children) in links {
        inv.registry.snapshot_mut(&s)?.child_snapshot = children;
    }
    Ok(())
}

/// Takes a snapshot of `r` as a child of its current snapshot.
pub fn create(
    inv: &mut Inventory,
    r: &MoRef,
    req: CreateSnapshotRequest,
) -> Result<MoRef, MethodFault> {
    let machine = inv.registry.vm(r)?;
    if machine.config.template {
        return Err(MethodFault::InvalidState);
    }
    if req.name.trim().is_empty() {
        return Err(MethodFault::InvalidName { name: req.name, entity: Some(r.clone()) });
    }
    let state = match (machine.runtime.power_state, req.memory) {
        (VirtualMachinePowerState::PoweredOn, false) => VirtualMachinePowerState::PoweredOff,
        (state, _) => state,
    };
    let config = machine.config.clone();
    let snap = inv.registry.put(ManagedObject::Snapshot(VirtualMachineSnapshot {
        config,
        vm: r.clone(),
        child_snapshot: Vec::new(),
    }));

    let machine = inv.registry.vm_mut(r)?;
    let info = machine.snapshot.get_or_insert_with(|| VirtualMachineSnapshotInfo {
        current_snapshot: None,
        root_snapshot_list: Vec::new(),
    });
    let node = Tree {
        snapshot: snap.clone(),
        vm: r.clone(),
        name: req.name,
        description: req.description.unwrap_or_default(),
        id: max_id(&info.root_snapshot_list) + 1,
        create_time: Utc::now(),
        state,
        quiesced: req.quiesce,
        child_snapshot_list: Vec::new(),
    };
    let current = info.current_snapshot.clone();
    let parent = match &current {
        Some(c) => find_mut(&mut info.root_snapshot_list, c),
        None => None,
    };
    match parent {
        Some(parent) => parent.child_snapshot_list.push(node),
        None => info.root_snapshot_list.push(node),
    }
    info.current_snapshot = Some(snap.clone());
    sync(inv, r)?;
    Ok(snap)
}

/// Restores the machine of snapshot `s` to the state it was taken in.
pub fn revert(inv: &mut Inventory, s: &MoRef) -> Outcome {
    let snap = inv.registry.snapshot(s)?;
    let (r, saved) = (snap.vm.clone(), snap.config.clone());
    let machine = inv.registry.vm_mut(&r)?;
    let state = machine
        .snapshot
        .as_ref()
        .and_then(|i| find(&i.root_snapshot_list, s))
        .map(|t| t.state)
        .ok_or(MethodFault::NotFound)?;

    let c = &mut machine.config;
    c.hardware = saved.hardware;
    c.annotation = saved.annotation;
    c.extra_config = saved.extra_config;
    c.guest_id = saved.guest_id;
    c.guest_full_name = saved.guest_full_name;
    c.version = saved.version;
    c.modified = Utc::now();
    c.change_version = c.modified.to_rfc3339();
    if let Some(info) = &mut machine.snapshot {
        info.current_snapshot = Some(s.clone());
    }
    if machine.runtime.power_state != state {
        vm::apply_power_state(machine, state);
    } else {
        vm::refresh(machine);
    }
    vm::relink(inv, &r)?;
    Ok(None)
}

/// Removes snapshot `s`, and its subtree when `remove_children` is set.
pub fn remove(inv: &mut Inventory, s: &MoRef, remove_children: bool) -> Outcome {
    let r = inv.registry.snapshot(s)?.vm.clone();
    let machine = inv.registry.vm_mut(&r)?;
    let Some(info) = &mut machine.snapshot else {
        return Err(MethodFault::NotFound);
    };
    let parent = parent_of(&info.root_snapshot_list, s).ok_or(MethodFault::NotFound)?;
    let node = detach(&mut info.root_snapshot_list, s, !remove_children)
        .ok_or(MethodFault::NotFound)?;
    let mut gone = Vec::new();
    match remove_children {
        true => collect(&node, &mut gone),
        false => gone.push(node.snapshot),
    }
    if info.current_snapshot.as_ref().is_some_and(|c| gone.contains(c)) {
        info.current_snapshot = parent;
    }
    for g in &gone {
        inv.registry.remove(g);
    }
    sync(inv, &r)?;
    Ok(None)
}

/// Removes every snapshot of `r`.
pub fn remove_all(inv: &mut Inventory, r: &MoRef) -> Outcome {
    let machine = inv.registry.vm_mut(r)?;
    let mut gone = Vec::new();
    if let Some(info) = machine.snapshot.take() {
        for t in &info.root_snapshot_list {
            collect(t, &mut gone);
        }
    }
    machine.root_snapshot.clear();
    for g in &gone {
        inv.registry.remove(g);
    }
    Ok(None)
}

fn rename(inv: &mut Inventory, s: &MoRef, req: RenameSnapshotRequest) -> MethodResult {
    let r = inv.registry.snapshot(s)?.vm.clone();
    let node = inv
        .registry
        .vm_mut(&r)?
        .snapshot
        .as_mut()
        .and_then(|i| find_mut(&mut i.root_snapshot_list, s))
        .ok_or(MethodFault::NotFound)?;
    if let Some(name) = req.name {
        if name.trim().is_empty() {
            return Err(MethodFault::InvalidName { name, entity: Some(s.clone()) });
        }
        node.name = name;
    }
    if let Some(description) = req.description {
        node.description = description;
    }
    Ok(Value::Null)
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    let s = this.clone();
    match method {
        "RemoveSnapshot_Task" => {
            let req: RemoveSnapshotRequest = decode(args)?;
            task::run(call, this, method, move |inv| remove(inv, &s, req.remove_children))
        }
        "RevertToSnapshot_Task" => task::run(call, this, method, move |inv| revert(inv, &s)),
        "RenameSnapshot" => {
            let req: RenameSnapshotRequest = decode(args)?;
            rename(call.inv, this, req)
        }
        _ => Err(method_not_found(this, method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::testing::{context, invoke_as, login, run_task};
    use serde_json::json;
    use std::sync::Arc;

    async fn snapshot(ctx: &Arc<crate::Context>, key: &str, vm: &MoRef, name: &str) -> MoRef {
        let out = run_task(ctx, key, vm, "CreateSnapshot_Task", json!({"name": name}))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_value(out).unwrap()
    }

    #[tokio::test]
    async fn tree_bookkeeping() {
        let ctx = context();
        let key = login(&ctx).await;
        let vm = ctx.inventory.lock().await.registry.all_of("VirtualMachine")[0].clone();

        let root = snapshot(&ctx, &key, &vm, "root").await;
        let a = snapshot(&ctx, &key, &vm, "a").await;
        run_task(&ctx, &key, &root, "RevertToSnapshot_Task", Value::Null).await.unwrap();
        let b = snapshot(&ctx, &key, &vm, "b").await;
        {
            let inv = ctx.inventory.lock().await;
            let m = inv.registry.vm(&vm).unwrap();
            assert_eq!(m.root_snapshot, vec![root.clone()]);
            assert_eq!(inv.registry.snapshot(&root).unwrap().child_snapshot, vec![a.clone(), b.clone()]);
            let info = m.snapshot.as_ref().unwrap();
            assert_eq!(info.current_snapshot.as_ref(), Some(&b));
            let ids: Vec<i32> = info.root_snapshot_list[0]
                .child_snapshot_list
                .iter()
                .map(|t| t.id)
                .collect();
            assert_eq!(ids, vec![2, 3]);
            // no memory captured, so the snapshots were taken powered off
            assert_eq!(info.root_snapshot_list[0].state, VirtualMachinePowerState::PoweredOff);
        }

        invoke_as(&ctx, Some(&key), &a, "RenameSnapshot", json!({"name": "renamed"}))
            .await
            .unwrap();

        // removing the root keeps its children
        run_task(&ctx, &key, &root, "RemoveSnapshot_Task", json!({"removeChildren": false}))
            .await
            .unwrap();
        {
            let inv = ctx.inventory.lock().await;
            let m = inv.registry.vm(&vm).unwrap();
            assert_eq!(m.root_snapshot, vec![a.clone(), b.clone()]);
            assert_eq!(m.snapshot.as_ref().unwrap().root_snapshot_list[0].name, "renamed");
            assert!(!inv.registry.contains(&root));
        }

        run_task(&ctx, &key, &vm, "RemoveAllSnapshots_Task", Value::Null).await.unwrap();
        let inv = ctx.inventory.lock().await;
        let m = inv.registry.vm(&vm).unwrap();
        assert!(m.snapshot.is_none());
        assert!(m.root_snapshot.is_empty());
        assert!(!inv.registry.contains(&a) && !inv.registry.contains(&b));
    }

    #[tokio::test]
    async fn revert_restores_hardware_and_power() {
        let ctx = context();
        let key = login(&ctx).await;
        let vm = ctx.inventory.lock().await.registry.all_of("VirtualMachine")[0].clone();

        let err = run_task(&ctx, &key, &vm, "RevertToCurrentSnapshot_Task", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err, MethodFault::NotFound);

        run_task(
            &ctx,
            &key,
            &vm,
            "CreateSnapshot_Task",
            json!({"name": "live", "memory": true}),
        )
        .await
        .unwrap();
        run_task(&ctx, &key, &vm, "ReconfigVM_Task", json!({"spec": {"numCPUs": 8}}))
            .await
            .unwrap();
        run_task(&ctx, &key, &vm, "PowerOffVM_Task", Value::Null).await.unwrap();

        run_task(&ctx, &key, &vm, "RevertToCurrentSnapshot_Task", Value::Null)
            .await
            .unwrap();
        let inv = ctx.inventory.lock().await;
        let m = inv.registry.vm(&vm).unwrap();
        assert_eq!(m.config.hardware.num_cpu, 1);
        assert_eq!(m.runtime.power_state, VirtualMachinePowerState::PoweredOn);
        assert_eq!(m.summary.config.num_cpu, 1);
    }

    #[tokio::test]
    async fn unknown_snapshot_method() {
        let ctx = context();
        let key = login(&ctx).await;
        let vm = ctx.inventory.lock().await.registry.all_of("VirtualMachine")[0].clone();
        let s = snapshot(&ctx, &key, &vm, "s").await;
        let err = invoke_as(&ctx, Some(&key), &s, "Destroy_Task", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, MethodFault::MethodNotFound { .. }));
    }
}
