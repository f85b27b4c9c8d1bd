// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `SearchIndex`. Lookups that find nothing answer `null`.

use serde_json::Value;
use vim_api_types::methods::{
    FindByDnsNameRequest, FindByInventoryPathRequest, FindByIpRequest,
    FindByUuidRequest, FindChildRequest,
};
use vim_api_types::MoRef;

use super::{decode, encode, method_not_found, Call, MethodResult};
use crate::registry::{escape_name, ManagedObject, Registry};

/// Resolves a path such as `/DC0/vm/DC0_H0_VM0` from the root folder.
pub fn find_by_path(reg: &Registry, path: &str) -> Option<MoRef> {
    let mut cur = reg.root_folder().clone();
    for elem in path.split('/').filter(|e| !e.is_empty()) {
        cur = reg.children(&cur).into_iter().find(|c| {
            reg.name(c).is_some_and(|n| n == elem || escape_name(n) == elem)
        })?;
    }
    Some(cur)
}

/// Objects below `datacenter` (or anywhere) for which `matches` holds.
fn find_all<F>(reg: &Registry, datacenter: Option<&MoRef>, vm: bool, matches: F) -> Vec<MoRef>
where
    F: Fn(&ManagedObject) -> bool,
{
    let kind = if vm { "VirtualMachine" } else { "HostSystem" };
    reg.all_of(kind)
        .into_iter()
        .filter(|r| match datacenter {
            Some(dc) => reg.datacenter_of(r).as_ref() == Some(dc),
            None => true,
        })
        .filter(|r| reg.get(r).is_some_and(&matches))
        .collect()
}

fn by_uuid(reg: &Registry, req: &FindByUuidRequest) -> Vec<MoRef> {
    let uuid = req.uuid.to_lowercase();
    let instance = req.instance_uuid.unwrap_or(false);
    find_all(reg, req.datacenter.as_ref(), req.vm_search, |obj| match obj {
        ManagedObject::VirtualMachine(vm) => {
            let id = match instance {
                true => &vm.config.instance_uuid,
                false => &vm.config.uuid,
            };
            id.to_lowercase() == uuid
        }
        ManagedObject::HostSystem(host) => {
            host.summary.hardware.uuid.to_lowercase() == uuid
        }
        _ => false,
    })
}

fn first(found: Vec<MoRef>) -> MethodResult {
    match found.into_iter().next() {
        Some(r) => encode(&r),
        None => Ok(Value::Null),
    }
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    let reg = &call.inv.registry;
    match method {
        "FindByInventoryPath" => {
            let req: FindByInventoryPathRequest = decode(args)?;
            match find_by_path(reg, &req.inventory_path) {
                Some(r) => encode(&r),
                None => Ok(Value::Null),
            }
        }
        "FindChild" => {
            let req: FindChildRequest = decode(args)?;
            reg.lookup(&req.entity)?;
            match reg.find_child(&req.entity, &req.name) {
                Some(r) => encode(&r),
                None => Ok(Value::Null),
            }
        }
        "FindByUuid" => {
            let req: FindByUuidRequest = decode(args)?;
            first(by_uuid(reg, &req))
        }
        "FindAllByUuid" => {
            let req: FindByUuidRequest = decode(args)?;
            encode(&by_uuid(reg, &req))
        }
        "FindByDnsName" | "FindAllByDnsName" => {
            let req: FindByDnsNameRequest = decode(args)?;
            let found = find_all(reg, req.datacenter.as_ref(), req.vm_search, |obj| {
                match obj {
                    ManagedObject::VirtualMachine(vm) => {
                        vm.guest.host_name.as_deref() == Some(req.dns_name.as_str())
                    }
                    ManagedObject::HostSystem(host) => {
                        host.summary.config.name == req.dns_name
                    }
                    _ => false,
                }
            });
            match method {
                "FindByDnsName" => first(found),
                _ => encode(&found),
            }
        }
        "FindByIp" | "FindAllByIp" => {
            let req: FindByIpRequest = decode(args)?;
            let found = find_all(reg, req.datacenter.as_ref(), req.vm_search, |obj| {
                match obj {
                    ManagedObject::VirtualMachine(vm) => {
                        vm.guest.ip_address.as_deref() == Some(req.ip.as_str())
                    }
                    ManagedObject::HostSystem(host) => host.summary.config.name == req.ip,
                    _ => false,
                }
            });
            match method {
                "FindByIp" => first(found),
                _ => encode(&found),
            }
        }
        _ => Err(method_not_found(this, method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::SEARCH_INDEX;
    use crate::vim::testing::{context, invoke_as, login};
    use serde_json::json;

    fn si() -> MoRef {
        MoRef::new("SearchIndex", SEARCH_INDEX)
    }

    #[tokio::test]
    async fn inventory_paths() {
        let ctx = context();
        let key = login(&ctx).await;
        let vm = ctx.inventory.lock().await.registry.all_of("VirtualMachine")[0].clone();
        let path = ctx.inventory.lock().await.registry.inventory_path(&vm);
        assert!(path.starts_with("/DC0/vm/"));

        let found = invoke_as(
            &ctx,
            Some(&key),
            &si(),
            "FindByInventoryPath",
            json!({"inventoryPath": path}),
        )
        .await
        .unwrap();
        assert_eq!(found, json!(vm));

        let none = invoke_as(
            &ctx,
            Some(&key),
            &si(),
            "FindByInventoryPath",
            json!({"inventoryPath": "/DC0/vm/nope"}),
        )
        .await
        .unwrap();
        assert_eq!(none, Value::Null);

        let root = ctx.inventory.lock().await.registry.root_folder().clone();
        let dc = invoke_as(
            &ctx,
            Some(&key),
            &si(),
            "FindChild",
            json!({"entity": root, "name": "DC0"}),
        )
        .await
        .unwrap();
        assert_eq!(dc["type"], "Datacenter");
    }

    #[tokio::test]
    async fn uuid_lookup() {
        let ctx = context();
        let key = login(&ctx).await;
        let (vm, uuid) = {
            let inv = ctx.inventory.lock().await;
            let vm = inv.registry.all_of("VirtualMachine")[0].clone();
            let uuid = inv.registry.vm(&vm).unwrap().config.uuid.clone();
            (vm, uuid)
        };
        let found = invoke_as(
            &ctx,
            Some(&key),
            &si(),
            "FindByUuid",
            json!({"uuid": uuid.to_uppercase(), "vmSearch": true}),
        )
        .await
        .unwrap();
        assert_eq!(found, json!(vm));

        let hosts = invoke_as(
            &ctx,
            Some(&key),
            &si(),
            "FindAllByUuid",
            json!({"uuid": uuid, "vmSearch": false}),
        )
        .await
        .unwrap();
        assert_eq!(hosts, json!([]));
    }
}
