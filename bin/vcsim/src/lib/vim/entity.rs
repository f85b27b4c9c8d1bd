// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Methods common to every `ManagedEntity`: rename, destroy and reload.

use serde_json::Value;
use vim_api_types::methods::RenameRequest;
use vim_api_types::mo::VirtualMachinePowerState;
use vim_api_types::{MethodFault, MoRef};

use super::task::{self, Outcome};
use super::{decode, event, method_not_found, pool, Call, MethodResult};
use crate::inventory::Inventory;
use crate::registry::{ManagedObject, Registry};

const MAX_NAME: usize = 80;

/// Checks that `name` may be given to `me` (or a new object) under
/// `parent`.
pub fn validate_name(
    reg: &Registry,
    parent: Option<&MoRef>,
    name: &str,
    me: Option<&MoRef>,
) -> Result<(), MethodFault> {
    if name.trim().is_empty() || name.chars().count() > MAX_NAME {
        return Err(MethodFault::InvalidName {
            name: name.to_string(),
            entity: me.cloned(),
        });
    }
    if let Some(existing) = parent.and_then(|p| reg.find_child(p, name)) {
        if Some(&existing) != me {
            return Err(MethodFault::DuplicateName {
                name: name.to_string(),
                object: existing,
            });
        }
    }
    Ok(())
}

/// Renames `r`, keeping the name copies in its summary up to date.
pub fn rename(inv: &mut Inventory, r: &MoRef, name: &str) -> Result<(), MethodFault> {
    let parent = inv.registry.entity(r)?.parent.clone();
    validate_name(&inv.registry, parent.as_ref(), name, Some(r))?;
    let Some(obj) = inv.registry.get_mut(r) else {
        return Err(MethodFault::not_found(r.clone()));
    };
    match obj {
        ManagedObject::VirtualMachine(vm) => {
            vm.config.name = name.to_string();
            vm.summary.config.name = name.to_string();
        }
        ManagedObject::HostSystem(host) => host.summary.config.name = name.to_string(),
        ManagedObject::Datastore(ds) => {
            ds.summary.name = name.to_string();
            ds.info.name = name.to_string();
        }
        ManagedObject::Network(net) => net.summary.name = name.to_string(),
        ManagedObject::Portgroup(pg) => {
            pg.network.summary.name = name.to_string();
            pg.config.name = name.to_string();
        }
        ManagedObject::Switch(dvs) => dvs.summary.name = name.to_string(),
        _ => {}
    }
    if let Some(e) = obj.entity_mut() {
        e.name = name.to_string();
    }
    Ok(())
}

/// Returns true if `r` is the root folder or one of a datacenter's
/// top-level folders.
fn is_fixed(reg: &Registry, r: &MoRef) -> bool {
    if r == reg.root_folder() {
        return true;
    }
    let Ok(parent) = reg.entity(r).map(|e| e.parent.clone()) else {
        return false;
    };
    match parent.and_then(|p| reg.datacenter(&p).ok()) {
        Some(dc) => [&dc.vm_folder, &dc.host_folder, &dc.datastore_folder, &dc.network_folder]
            .contains(&r),
        None => false,
    }
}

fn is_powered_on(reg: &Registry, vm: &MoRef) -> bool {
    reg.vm(vm)
        .is_ok_and(|vm| vm.runtime.power_state == VirtualMachinePowerState::PoweredOn)
}

/// Removes a virtual machine together with its snapshots.
pub fn purge_vm(inv: &mut Inventory, vm: &MoRef) {
    let snapshots: Vec<MoRef> = inv
        .registry
        .iter()
        .filter_map(|(r, o)| match o {
            ManagedObject::Snapshot(s) if &s.vm == vm => Some(r.clone()),
            _ => None,
        })
        .collect();
    for s in snapshots {
        inv.registry.purge(&s);
    }
    inv.registry.purge(vm);
}

/// Destroys `r` and everything below it.
pub fn destroy(inv: &mut Inventory, r: &MoRef, user: &str) -> Outcome {
    let reg = &inv.registry;
    reg.lookup(r)?;
    if is_fixed(reg, r) {
        return Err(MethodFault::NotSupported);
    }
    match r.kind.as_str() {
        "ResourcePool" => return pool::destroy(inv, r).map(|_| None),
        "VirtualMachine" => {
            let vm = reg.vm(r)?;
            if vm.runtime.power_state == VirtualMachinePowerState::PoweredOn {
                return Err(MethodFault::invalid_power_state(
                    None,
                    vm.runtime.power_state.as_str(),
                ));
            }
        }
        "HostSystem" => {
            // a standalone host goes with its compute resource
            if let Some(parent) = reg.entity(r)?.parent.clone() {
                if parent.kind == "ComputeResource" {
                    return destroy(inv, &parent, user);
                }
            }
        }
        _ => {}
    }

    let below = reg.descendants(r);
    if below.iter().any(|d| d.kind == "VirtualMachine" && is_powered_on(reg, d)) {
        return Err(MethodFault::InvalidState);
    }
    let name = reg.name(r).unwrap_or_default().to_string();
    if r.kind == "VirtualMachine" {
        event::post(inv, "VmRemovedEvent", user, Some(r), format!("Removed {name}"));
    }

    for d in below.iter().rev().chain(std::iter::once(r)) {
        match d.kind.as_str() {
            "VirtualMachine" => purge_vm(inv, d),
            _ => {
                inv.registry.purge(d);
            }
        }
    }
    Ok(None)
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    match method {
        "Rename_Task" => {
            let req: RenameRequest = decode(args)?;
            let r = this.clone();
            task::run(call, this, method, move |inv| {
                rename(inv, &r, &req.new_name).map(|_| None)
            })
        }
        "Destroy_Task" => {
            let r = this.clone();
            let user = call.user();
            task::run(call, this, method, move |inv| destroy(inv, &r, &user))
        }
        "Reload" => {
            call.inv.registry.lookup(this)?;
            Ok(Value::Null)
        }
        _ => Err(method_not_found(this, method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::testing::{context, login, run_task};
    use serde_json::json;

    #[tokio::test]
    async fn rename_rules() {
        let ctx = context();
        let key = login(&ctx).await;
        let (a, b) = {
            let inv = ctx.inventory.lock().await;
            let vms = inv.registry.all_of("VirtualMachine");
            let a = vms[0].clone();
            // a sibling in the same folder
            let parent = inv.registry.entity(&a).unwrap().parent.clone().unwrap();
            let b = inv
                .registry
                .children(&parent)
                .into_iter()
                .find(|c| c != &a)
                .unwrap();
            (a, b)
        };
        let b_name = ctx.inventory.lock().await.registry.name(&b).unwrap().to_string();

        let err = run_task(&ctx, &key, &a, "Rename_Task", json!({"newName": ""}))
            .await
            .unwrap_err();
        assert!(matches!(err, MethodFault::InvalidName { .. }));

        let err = run_task(&ctx, &key, &a, "Rename_Task", json!({"newName": b_name}))
            .await
            .unwrap_err();
        assert_eq!(err, MethodFault::DuplicateName { name: b_name, object: b });

        run_task(&ctx, &key, &a, "Rename_Task", json!({"newName": "renamed"}))
            .await
            .unwrap();
        let inv = ctx.inventory.lock().await;
        let vm = inv.registry.vm(&a).unwrap();
        assert_eq!(vm.entity.name, "renamed");
        assert_eq!(vm.config.name, "renamed");
        assert_eq!(vm.summary.config.name, "renamed");
    }

    #[tokio::test]
    async fn destroy_datacenter_requires_powered_off_vms() {
        let ctx = context();
        let key = login(&ctx).await;
        let dc = ctx.inventory.lock().await.registry.all_of("Datacenter")[0].clone();

        let err = run_task(&ctx, &key, &dc, "Destroy_Task", Value::Null).await.unwrap_err();
        assert_eq!(err, MethodFault::InvalidState);

        let vms = ctx.inventory.lock().await.registry.all_of("VirtualMachine");
        for vm in &vms {
            run_task(&ctx, &key, vm, "PowerOffVM_Task", Value::Null).await.unwrap();
        }
        run_task(&ctx, &key, &dc, "Destroy_Task", Value::Null).await.unwrap();

        let inv = ctx.inventory.lock().await;
        assert!(inv.registry.all_of("VirtualMachine").is_empty());
        assert!(inv.registry.all_of("HostSystem").is_empty());
        assert!(inv.registry.folder(inv.registry.root_folder()).unwrap().child_entity.is_empty());
    }

    #[tokio::test]
    async fn fixed_folders_stay() {
        let ctx = context();
        let key = login(&ctx).await;
        let (root, vm_folder) = {
            let inv = ctx.inventory.lock().await;
            let dc = inv.registry.all_of("Datacenter")[0].clone();
            let vm_folder = inv.registry.datacenter(&dc).unwrap().vm_folder.clone();
            (inv.registry.root_folder().clone(), vm_folder)
        };
        for r in [&root, &vm_folder] {
            let err = run_task(&ctx, &key, r, "Destroy_Task", Value::Null).await.unwrap_err();
            assert_eq!(err, MethodFault::NotSupported);
        }
    }
}
