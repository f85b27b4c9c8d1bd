// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde_json::Value;
use vim_api_types::methods::{CreateResourcePoolRequest, UpdateResourcePoolConfigRequest};
use vim_api_types::mo::{self, ManagedEntity, ResourceConfigSpec};
use vim_api_types::{MethodFault, MoRef};

use super::{decode, encode, entity, Call, MethodResult};
use crate::inventory::Inventory;
use crate::registry::ManagedObject;

pub fn new_pool(
    name: &str,
    owner: &MoRef,
    parent: &MoRef,
    config: ResourceConfigSpec,
) -> ManagedObject {
    ManagedObject::ResourcePool(mo::ResourcePool {
        entity: ManagedEntity::new(name, Some(parent.clone())),
        owner: owner.clone(),
        resource_pool: Vec::new(),
        vm: Vec::new(),
        config,
    })
}

/// Creates a child pool of `parent`.
pub fn create(
    inv: &mut Inventory,
    parent: &MoRef,
    name: &str,
    config: ResourceConfigSpec,
) -> Result<MoRef, MethodFault> {
    entity::validate_name(&inv.registry, Some(parent), name, None)?;
    let owner = inv.registry.pool(parent)?.owner.clone();
    let child = inv.registry.put(new_pool(name, &owner, parent, config));
    inv.registry.pool_mut(parent)?.resource_pool.push(child.clone());
    Ok(child)
}

/// Destroys pool `r`, handing its child pools and VMs to its parent pool.
pub fn destroy(inv: &mut Inventory, r: &MoRef) -> Result<(), MethodFault> {
    let pool = inv.registry.pool(r)?;
    let parent = match pool.entity.parent.clone() {
        Some(p) if p.kind == "ResourcePool" => p,
        _ => return Err(MethodFault::NotSupported),
    };
    let children = pool.resource_pool.clone();
    let vms = pool.vm.clone();

    for child in &children {
        inv.registry.entity_mut(child)?.parent = Some(parent.clone());
    }
    for vm in &vms {
        inv.registry.vm_mut(vm)?.resource_pool = Some(parent.clone());
    }
    let p = inv.registry.pool_mut(&parent)?;
    p.resource_pool.extend(children);
    p.vm.extend(vms);
    inv.registry.purge(r);
    Ok(())
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    match method {
        "CreateResourcePool" => {
            let req: CreateResourcePoolRequest = decode(args)?;
            encode(&create(call.inv, this, &req.name, req.spec)?)
        }
        "UpdateConfig" => {
            let req: UpdateResourcePoolConfigRequest = decode(args)?;
            if let Some(name) = &req.name {
                entity::rename(call.inv, this, name)?;
            }
            if let Some(config) = req.config {
                call.inv.registry.pool_mut(this)?.config = config;
            }
            Ok(Value::Null)
        }
        _ => entity::dispatch(call, this, method, args),
    }
}
