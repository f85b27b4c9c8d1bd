// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Folder`: creation of child entities and moves between folders.

use serde_json::Value;
use vim_api_types::methods::{
    AddStandaloneHostRequest, CreateClusterExRequest, CreateVmRequest,
    MoveIntoFolderRequest, NameRequest,
};
use vim_api_types::mo::{self, ClusterConfigInfoEx, ManagedEntity};
use vim_api_types::{MethodFault, MoRef};

use super::property::path::is_kind_of;
use super::task::{self, Outcome};
use super::{compute, decode, encode, entity, vm, Call, MethodResult};
use crate::inventory::Inventory;
use crate::registry::ManagedObject;

pub const DATACENTER_TYPES: &[&str] = &["Folder", "Datacenter"];
pub const VM_TYPES: &[&str] = &["Folder", "VirtualMachine", "VirtualApp"];
pub const HOST_TYPES: &[&str] = &["Folder", "ComputeResource"];
pub const DATASTORE_TYPES: &[&str] = &["Folder", "Datastore", "StoragePod"];
pub const NETWORK_TYPES: &[&str] =
    &["Folder", "Network", "DistributedVirtualSwitch"];

pub fn new_folder(name: &str, parent: Option<&MoRef>, child_type: &[&str]) -> ManagedObject {
    ManagedObject::Folder(mo::Folder {
        entity: ManagedEntity::new(name, parent.cloned()),
        child_type: child_type.iter().map(|t| t.to_string()).collect(),
        child_entity: Vec::new(),
    })
}

/// Returns true if `folder` may hold objects of `kind`.
pub fn accepts(inv: &Inventory, folder: &MoRef, kind: &str) -> Result<bool, MethodFault> {
    let f = inv.registry.folder(folder)?;
    Ok(f.child_type.iter().any(|t| is_kind_of(kind, t)))
}

fn require(inv: &Inventory, folder: &MoRef, kind: &str) -> Result<(), MethodFault> {
    match accepts(inv, folder, kind)? {
        true => Ok(()),
        false => Err(MethodFault::NotSupported),
    }
}

/// Creates a subfolder accepting the same child types as `parent`.
pub fn create_folder(
    inv: &mut Inventory,
    parent: &MoRef,
    name: &str,
) -> Result<MoRef, MethodFault> {
    require(inv, parent, "Folder")?;
    entity::validate_name(&inv.registry, Some(parent), name, None)?;
    let types = inv.registry.folder(parent)?.child_type.clone();
    let types: Vec<&str> = types.iter().map(String::as_str).collect();
    let child = inv.registry.put(new_folder(name, Some(parent), &types));
    inv.registry.folder_mut(parent)?.child_entity.push(child.clone());
    Ok(child)
}

/// Fixed references for a datacenter and its four folders.
pub struct DatacenterRefs {
    pub datacenter: MoRef,
    pub vm: MoRef,
    pub host: MoRef,
    pub datastore: MoRef,
    pub network: MoRef,
}

/// Creates a datacenter with its vm, host, datastore and network folders.
pub fn create_datacenter(
    inv: &mut Inventory,
    parent: &MoRef,
    name: &str,
    fixed: Option<DatacenterRefs>,
) -> Result<MoRef, MethodFault> {
    require(inv, parent, "Datacenter")?;
    entity::validate_name(&inv.registry, Some(parent), name, None)?;
    let refs = match fixed {
        Some(refs) => refs,
        None => DatacenterRefs {
            datacenter: inv.registry.new_ref("Datacenter"),
            vm: inv.registry.new_ref("Folder"),
            host: inv.registry.new_ref("Folder"),
            datastore: inv.registry.new_ref("Folder"),
            network: inv.registry.new_ref("Folder"),
        },
    };
    let dc = &refs.datacenter;
    for (r, name, types) in [
        (&refs.vm, "vm", VM_TYPES),
        (&refs.host, "host", HOST_TYPES),
        (&refs.datastore, "datastore", DATASTORE_TYPES),
        (&refs.network, "network", NETWORK_TYPES),
    ] {
        inv.registry.insert(r.clone(), new_folder(name, Some(dc), types));
    }
    inv.registry.insert(
        dc.clone(),
        ManagedObject::Datacenter(mo::Datacenter {
            entity: ManagedEntity::new(name, Some(parent.clone())),
            vm_folder: refs.vm.clone(),
            host_folder: refs.host.clone(),
            datastore_folder: refs.datastore.clone(),
            network_folder: refs.network.clone(),
            datastore: Vec::new(),
            network: Vec::new(),
        }),
    );
    inv.registry.folder_mut(parent)?.child_entity.push(dc.clone());
    Ok(refs.datacenter)
}

fn add_standalone_host(
    inv: &mut Inventory,
    folder: &MoRef,
    req: AddStandaloneHostRequest,
) -> Outcome {
    require(inv, folder, "ComputeResource")?;
    let name = match req.spec.host_name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(MethodFault::invalid_argument("spec.hostName")),
    };
    let cr = compute::create(inv, folder, &name, None, None)?;
    compute::add_host(inv, &cr, &req.spec, req.add_connected)?;
    Ok(Some(encode(&cr)?))
}

/// Moves each of `list` into `folder`.
fn move_into(inv: &mut Inventory, folder: &MoRef, list: &[MoRef]) -> Outcome {
    for r in list {
        inv.registry.lookup(r)?;
        require(inv, folder, &r.kind)?;
        if inv.registry.is_descendant(folder, r) {
            return Err(MethodFault::invalid_argument("list"));
        }
        let old = inv.registry.entity(r)?.parent.clone();
        match &old {
            Some(p) if p.kind == "Folder" => {}
            _ => return Err(MethodFault::invalid_argument("list")),
        }
    }
    for r in list {
        let old = inv.registry.entity(r)?.parent.clone();
        if old.as_ref() == Some(folder) {
            continue;
        }
        if let Some(old) = old {
            inv.registry.folder_mut(&old)?.child_entity.retain(|c| c != r);
        }
        inv.registry.entity_mut(r)?.parent = Some(folder.clone());
        inv.registry.folder_mut(folder)?.child_entity.push(r.clone());
    }
    Ok(None)
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    let f = this.clone();
    match method {
        "CreateFolder" => {
            let req: NameRequest = decode(args)?;
            encode(&create_folder(call.inv, this, &req.name)?)
        }
        "CreateDatacenter" => {
            let req: NameRequest = decode(args)?;
            encode(&create_datacenter(call.inv, this, &req.name, None)?)
        }
        "CreateClusterEx" => {
            let req: CreateClusterExRequest = decode(args)?;
            require(call.inv, this, "ClusterComputeResource")?;
            let config = ClusterConfigInfoEx {
                drs_config: req.spec.drs_config.unwrap_or_default(),
                das_config: req.spec.das_config.unwrap_or_default(),
            };
            encode(&compute::create(call.inv, this, &req.name, Some(config), None)?)
        }
        "AddStandaloneHost_Task" => {
            let req: AddStandaloneHostRequest = decode(args)?;
            task::run(call, this, method, move |inv| add_standalone_host(inv, &f, req))
        }
        "CreateVM_Task" => {
            let req: CreateVmRequest = decode(args)?;
            let user = call.user();
            task::run(call, this, method, move |inv| {
                require(inv, &f, "VirtualMachine")?;
                let created =
                    vm::create(inv, &f, &req.pool, req.host.as_ref(), req.config, &user)?;
                Ok(Some(encode(&created)?))
            })
        }
        "MoveIntoFolder_Task" => {
            let req: MoveIntoFolderRequest = decode(args)?;
            task::run(call, this, method, move |inv| move_into(inv, &f, &req.list))
        }
        _ => entity::dispatch(call, this, method, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::testing::{context, invoke_as, login, run_task};
    use serde_json::json;

    #[tokio::test]
    async fn datacenters_only_in_datacenter_folders() {
        let ctx = context();
        let key = login(&ctx).await;
        let (root, vm_folder) = {
            let inv = ctx.inventory.lock().await;
            let dc = inv.registry.all_of("Datacenter")[0].clone();
            let vm_folder = inv.registry.datacenter(&dc).unwrap().vm_folder.clone();
            (inv.registry.root_folder().clone(), vm_folder)
        };

        let dc = invoke_as(&ctx, Some(&key), &root, "CreateDatacenter", json!({"name": "DC9"}))
            .await
            .unwrap();
        let dc: MoRef = serde_json::from_value(dc).unwrap();
        {
            let inv = ctx.inventory.lock().await;
            let d = inv.registry.datacenter(&dc).unwrap();
            assert_eq!(inv.registry.inventory_path(&d.host_folder), "/DC9/host");
            assert!(accepts(&inv, &d.vm_folder, "VirtualMachine").unwrap());
            assert!(!accepts(&inv, &d.vm_folder, "HostSystem").unwrap());
        }

        let err =
            invoke_as(&ctx, Some(&key), &vm_folder, "CreateDatacenter", json!({"name": "x"}))
                .await
                .unwrap_err();
        assert_eq!(err, MethodFault::NotSupported);

        let err = invoke_as(&ctx, Some(&key), &root, "CreateFolder", json!({"name": "DC9"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MethodFault::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn move_vm_between_folders() {
        let ctx = context();
        let key = login(&ctx).await;
        let (vm_folder, vm) = {
            let inv = ctx.inventory.lock().await;
            let dc = inv.registry.all_of("Datacenter")[0].clone();
            let vm_folder = inv.registry.datacenter(&dc).unwrap().vm_folder.clone();
            (vm_folder, inv.registry.all_of("VirtualMachine")[0].clone())
        };

        let sub = invoke_as(&ctx, Some(&key), &vm_folder, "CreateFolder", json!({"name": "apps"}))
            .await
            .unwrap();
        let sub: MoRef = serde_json::from_value(sub).unwrap();

        run_task(&ctx, &key, &sub, "MoveIntoFolder_Task", json!({"list": [vm]}))
            .await
            .unwrap();
        {
            let inv = ctx.inventory.lock().await;
            assert!(inv.registry.inventory_path(&vm).starts_with("/DC0/vm/apps/"));
            assert!(!inv.registry.folder(&vm_folder).unwrap().child_entity.contains(&vm));
        }

        // a folder cannot move into itself
        let err = run_task(&ctx, &key, &sub, "MoveIntoFolder_Task", json!({"list": [sub]}))
            .await
            .unwrap_err();
        assert_eq!(err, MethodFault::invalid_argument("list"));

        let host_folder = {
            let inv = ctx.inventory.lock().await;
            let dc = inv.registry.all_of("Datacenter")[0].clone();
            inv.registry.datacenter(&dc).unwrap().host_folder.clone()
        };
        let err = run_task(&ctx, &key, &host_folder, "MoveIntoFolder_Task", json!({"list": [vm]}))
            .await
            .unwrap_err();
        assert_eq!(err, MethodFault::NotSupported);
    }

    #[tokio::test]
    async fn standalone_host_and_cluster() {
        let ctx = context();
        let key = login(&ctx).await;
        let host_folder = {
            let inv = ctx.inventory.lock().await;
            let dc = inv.registry.all_of("Datacenter")[0].clone();
            inv.registry.datacenter(&dc).unwrap().host_folder.clone()
        };

        let cr = run_task(
            &ctx,
            &key,
            &host_folder,
            "AddStandaloneHost_Task",
            json!({"spec": {"hostName": "esx9"}, "addConnected": true}),
        )
        .await
        .unwrap()
        .unwrap();
        let cr: MoRef = serde_json::from_value(cr).unwrap();
        assert_eq!(cr.kind, "ComputeResource");

        let cluster = invoke_as(
            &ctx,
            Some(&key),
            &host_folder,
            "CreateClusterEx",
            json!({"name": "C9", "spec": {"drsConfig": {"enabled": true}}}),
        )
        .await
        .unwrap();
        let cluster: MoRef = serde_json::from_value(cluster).unwrap();

        let inv = ctx.inventory.lock().await;
        let c = inv.registry.compute(&cluster).unwrap();
        assert_eq!(c.configuration_ex.as_ref().unwrap().drs_config.enabled, Some(true));
        let pool = c.resource_pool.clone().unwrap();
        assert_eq!(inv.registry.name(&pool), Some(compute::ROOT_POOL));
        assert_eq!(inv.registry.compute(&cr).unwrap().host.len(), 1);
    }
}
