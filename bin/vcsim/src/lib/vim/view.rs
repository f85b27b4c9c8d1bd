// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `ViewManager` with its container and list views.

use serde_json::{json, Value};
use vim_api_types::methods::{
    CreateContainerViewRequest, ListViewRequest, ModifyListViewRequest,
};
use vim_api_types::mo;
use vim_api_types::{MethodFault, MoRef};

use super::property::path::{is_kind_of, is_known_type};
use super::{decode, encode, method_not_found, Call, MethodResult};
use crate::inventory::{Inventory, Scoped, ScopedObject};
use crate::registry::Registry;

/// Current members of a container view.
pub fn container_contents(reg: &Registry, view: &mo::ContainerView) -> Vec<MoRef> {
    let candidates = match view.recursive {
        true => reg.descendants(&view.container),
        false => reg.children(&view.container),
    };
    candidates
        .into_iter()
        .filter(|r| {
            view.kind.is_empty() || view.kind.iter().any(|t| is_kind_of(&r.kind, t))
        })
        .collect()
}

pub fn manager_properties(inv: &Inventory, session: Option<&str>) -> Value {
    let views: Vec<&MoRef> = inv
        .scoped
        .iter()
        .filter(|(_, s)| Some(s.owner.as_str()) == session)
        .filter(|(_, s)| {
            matches!(s.object, ScopedObject::ContainerView(_) | ScopedObject::ListView(_))
        })
        .map(|(r, _)| r)
        .collect();
    json!({ "viewList": views })
}

fn is_container(kind: &str) -> bool {
    matches!(
        kind,
        "Folder"
            | "Datacenter"
            | "ComputeResource"
            | "ClusterComputeResource"
            | "ResourcePool"
            | "HostSystem"
    )
}

fn add_view(call: &mut Call<'_>, kind: &str, object: ScopedObject) -> MethodResult {
    let owner = call.session.clone().unwrap_or_default();
    let view = Inventory::scoped_ref(&owner, kind);
    call.inv.scoped.insert(view.clone(), Scoped { owner, object });
    encode(&view)
}

/// Splits `refs` into those naming inventory objects and the rest.
fn resolve(reg: &Registry, refs: Vec<MoRef>) -> (Vec<MoRef>, Vec<MoRef>) {
    refs.into_iter().partition(|r| reg.contains(r))
}

fn list_view_mut<'a>(
    call: &'a mut Call<'_>,
    this: &MoRef,
) -> Result<&'a mut mo::ListView, MethodFault> {
    match call.inv.scoped_mut(call.session.as_deref(), this)? {
        ScopedObject::ListView(v) => Ok(v),
        _ => Err(MethodFault::not_found(this.clone())),
    }
}

fn manager_dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    match method {
        "CreateContainerView" => {
            let req: CreateContainerViewRequest = decode(args)?;
            let container = call
                .inv
                .registry
                .get(&req.container)
                .map(|o| o.kind())
                .filter(|kind| is_container(kind));
            if container.is_none() {
                return Err(MethodFault::invalid_argument("container"));
            }
            if req.kind.iter().any(|t| !is_known_type(t)) {
                return Err(MethodFault::invalid_argument("type"));
            }
            let view = mo::ContainerView {
                container: req.container,
                kind: req.kind,
                recursive: req.recursive,
                view: Vec::new(),
            };
            add_view(call, "ContainerView", ScopedObject::ContainerView(view))
        }
        "CreateListView" => {
            let req: ListViewRequest = decode(args)?;
            let (found, missing) = resolve(&call.inv.registry, req.obj);
            if let Some(r) = missing.into_iter().next() {
                return Err(MethodFault::not_found(r));
            }
            add_view(call, "ListView", ScopedObject::ListView(mo::ListView { view: found }))
        }
        "CreateListViewFromView" => {
            let source: MoRef = decode::<Value>(args)?
                .get("view")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| MethodFault::InvalidRequest { reason: e.to_string() })?
                .ok_or_else(|| MethodFault::invalid_argument("view"))?;
            let members = match call.inv.scoped(call.session.as_deref(), &source)? {
                ScopedObject::ContainerView(v) => {
                    container_contents(&call.inv.registry, v)
                }
                ScopedObject::ListView(v) => v.view.clone(),
                _ => return Err(MethodFault::invalid_argument("view")),
            };
            add_view(
                call,
                "ListView",
                ScopedObject::ListView(mo::ListView { view: members }),
            )
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
    if this.kind == "ViewManager" {
        return manager_dispatch(call, this, method, args);
    }
    call.inv.scoped(call.session.as_deref(), this)?;
    match (this.kind.as_str(), method) {
        (_, "DestroyView") => {
            call.inv.scoped.remove(this);
            call.inv.registry.touch();
            Ok(Value::Null)
        }
        ("ListView", "ModifyListView") => {
            let req: ModifyListViewRequest = decode(args)?;
            let (found, missing) = resolve(&call.inv.registry, req.add);
            let view = list_view_mut(call, this)?;
            for r in found {
                if !view.view.contains(&r) {
                    view.view.push(r);
                }
            }
            view.view.retain(|r| !req.remove.contains(r));
            call.inv.registry.touch();
            encode(&missing)
        }
        ("ListView", "ResetListView") => {
            let req: ListViewRequest = decode(args)?;
            let (found, missing) = resolve(&call.inv.registry, req.obj);
            list_view_mut(call, this)?.view = found;
            call.inv.registry.touch();
            encode(&missing)
        }
        _ => Err(method_not_found(this, method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::VIEW_MANAGER;
    use crate::vim::testing::{context, invoke_as, login};

    fn vm_manager() -> MoRef {
        MoRef::new("ViewManager", VIEW_MANAGER)
    }

    #[tokio::test]
    async fn container_view_tracks_inventory() {
        let ctx = context();
        let key = login(&ctx).await;
        let root = ctx.inventory.lock().await.registry.root_folder().clone();

        let view = invoke_as(
            &ctx,
            Some(&key),
            &vm_manager(),
            "CreateContainerView",
            json!({"container": root, "type": ["ManagedEntity"], "recursive": false}),
        )
        .await
        .unwrap();
        let view: MoRef = serde_json::from_value(view).unwrap();
        let members = invoke_as(&ctx, Some(&key), &view, "view", Value::Null).await;
        // properties are not methods
        assert!(matches!(members.unwrap_err(), MethodFault::MethodNotFound { .. }));

        let inv = ctx.inventory.lock().await;
        let members =
            crate::vim::read_property(&inv, Some(&key), &view, "view").unwrap();
        let members: Vec<MoRef> = serde_json::from_value(members).unwrap();
        assert_eq!(members, inv.registry.children(&root));
        drop(inv);

        let hosts = invoke_as(
            &ctx,
            Some(&key),
            &vm_manager(),
            "CreateContainerView",
            json!({"container": root, "type": ["HostSystem"], "recursive": true}),
        )
        .await
        .unwrap();
        let hosts: MoRef = serde_json::from_value(hosts).unwrap();
        let inv = ctx.inventory.lock().await;
        let members = crate::vim::read_property(&inv, Some(&key), &hosts, "view").unwrap();
        assert_eq!(
            members.as_array().unwrap().len(),
            inv.registry.all_of("HostSystem").len()
        );

        // another session cannot see the view
        assert!(crate::vim::read_property(&inv, Some("other"), &hosts, "view").is_err());
    }

    #[tokio::test]
    async fn container_view_validation() {
        let ctx = context();
        let key = login(&ctx).await;
        let root = ctx.inventory.lock().await.registry.root_folder().clone();
        let vm = ctx.inventory.lock().await.registry.all_of("VirtualMachine")[0].clone();

        let err = invoke_as(
            &ctx,
            Some(&key),
            &vm_manager(),
            "CreateContainerView",
            json!({"container": vm, "type": [], "recursive": true}),
        )
        .await
        .unwrap_err();
        assert_eq!(err, MethodFault::invalid_argument("container"));

        let err = invoke_as(
            &ctx,
            Some(&key),
            &vm_manager(),
            "CreateContainerView",
            json!({"container": root, "type": ["Bogus"], "recursive": true}),
        )
        .await
        .unwrap_err();
        assert_eq!(err, MethodFault::invalid_argument("type"));
    }

    #[tokio::test]
    async fn list_view_membership() {
        let ctx = context();
        let key = login(&ctx).await;
        let vms = ctx.inventory.lock().await.registry.all_of("VirtualMachine");
        let bogus = MoRef::new("VirtualMachine", "vm-424242");

        let err = invoke_as(
            &ctx,
            Some(&key),
            &vm_manager(),
            "CreateListView",
            json!({"obj": [vms[0], bogus]}),
        )
        .await
        .unwrap_err();
        assert_eq!(err, MethodFault::not_found(bogus.clone()));

        let view = invoke_as(
            &ctx,
            Some(&key),
            &vm_manager(),
            "CreateListView",
            json!({"obj": [vms[0]]}),
        )
        .await
        .unwrap();
        let view: MoRef = serde_json::from_value(view).unwrap();

        let unresolved = invoke_as(
            &ctx,
            Some(&key),
            &view,
            "ModifyListView",
            json!({"add": [vms[1], bogus], "remove": [vms[0]]}),
        )
        .await
        .unwrap();
        assert_eq!(unresolved, json!([bogus]));
        {
            let inv = ctx.inventory.lock().await;
            let members = crate::vim::read_property(&inv, Some(&key), &view, "view").unwrap();
            assert_eq!(members, json!([vms[1]]));
        }

        invoke_as(&ctx, Some(&key), &view, "DestroyView", Value::Null).await.unwrap();
        let gone = invoke_as(&ctx, Some(&key), &view, "DestroyView", Value::Null).await;
        assert_eq!(gone.unwrap_err(), MethodFault::not_found(view));
    }
}
