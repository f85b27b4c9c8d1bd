// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster modules: named groups of VMs within a cluster.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dropshot::{
    endpoint, HttpError, HttpResponseDeleted, HttpResponseOk, Path, Query,
    RequestContext, TypedBody,
};
use schemars::JsonSchema;
use serde::Deserialize;
use vim_api_types::vapi::cluster::{
    CreateModule, ModuleMembers, ModuleMembersResult, ModuleSummary,
    ModuleSummaryList,
};
use vim_api_types::vapi::ActionQuery;
use vim_api_types::MoRef;

use super::{action, authorize, unknown_action, Error, VapiResult};
use crate::registry::Registry;
use crate::Context;

struct Module {
    cluster: String,
    members: BTreeSet<String>,
}

#[derive(Default)]
pub struct Store {
    modules: BTreeMap<String, Module>,
}

/// Returns true if VM `id` runs in a resource pool of `cluster`.
fn in_cluster(reg: &Registry, cluster: &str, id: &str) -> bool {
    let vm = MoRef::new("VirtualMachine", id);
    let Ok(vm) = reg.vm(&vm) else {
        return false;
    };
    vm.resource_pool
        .as_ref()
        .and_then(|p| reg.pool(p).ok())
        .is_some_and(|p| p.owner.kind == "ClusterComputeResource" && p.owner.value == cluster)
}

impl Store {
    pub fn create(&mut self, reg: &Registry, cluster: &str) -> VapiResult<String> {
        let r = MoRef::new("ClusterComputeResource", cluster);
        if !reg.contains(&r) {
            return Err(Error::InvalidArgument(format!("cluster {cluster}")));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.modules.insert(
            id.clone(),
            Module { cluster: cluster.to_string(), members: BTreeSet::new() },
        );
        Ok(id)
    }

    pub fn list(&self) -> ModuleSummaryList {
        ModuleSummaryList {
            summaries: self
                .modules
                .iter()
                .map(|(id, m)| ModuleSummary {
                    cluster: m.cluster.clone(),
                    module: id.clone(),
                })
                .collect(),
        }
    }

    pub fn delete(&mut self, id: &str) -> VapiResult<()> {
        self.modules
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("module {id}")))
    }

    fn module(&mut self, id: &str) -> VapiResult<&mut Module> {
        self.modules
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("module {id}")))
    }

    pub fn members(&mut self, id: &str) -> VapiResult<ModuleMembers> {
        let m = self.module(id)?;
        Ok(ModuleMembers { vms: m.members.iter().cloned().collect() })
    }

    /// Adds `vms` to module `id`. Nothing is added unless every VM is in
    /// the module's cluster and not yet a member.
    pub fn add(&mut self, reg: &Registry, id: &str, vms: &[String]) -> VapiResult<bool> {
        let m = self.module(id)?;
        let valid = vms
            .iter()
            .all(|vm| !m.members.contains(vm) && in_cluster(reg, &m.cluster, vm));
        if valid {
            m.members.extend(vms.iter().cloned());
        }
        Ok(valid)
    }

    /// Removes `vms` from module `id`, failing if any is not a member.
    pub fn remove(&mut self, id: &str, vms: &[String]) -> VapiResult<bool> {
        let m = self.module(id)?;
        let valid = vms.iter().all(|vm| m.members.contains(vm));
        if valid {
            for vm in vms {
                m.members.remove(vm);
            }
        }
        Ok(valid)
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct ModulePath {
    module: String,
}

#[endpoint {
    method = GET,
    path = "/api/vcenter/cluster/modules",
}]
pub async fn module_list(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<ModuleSummaryList>, HttpError> {
    let state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.modules.list()))
}

#[endpoint {
    method = POST,
    path = "/api/vcenter/cluster/modules",
}]
pub async fn module_create(
    rqctx: RequestContext<Arc<Context>>,
    body: TypedBody<CreateModule>,
) -> std::result::Result<HttpResponseOk<String>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let inv = rqctx.context().inventory.lock().await;
    let id = state.modules.create(&inv.registry, &body.into_inner().spec.cluster)?;
    Ok(HttpResponseOk(id))
}

#[endpoint {
    method = DELETE,
    path = "/api/vcenter/cluster/modules/{module}",
}]
pub async fn module_delete(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<ModulePath>,
) -> std::result::Result<HttpResponseDeleted, HttpError> {
    let mut state = authorize(&rqctx).await?;
    state.modules.delete(&path.into_inner().module)?;
    Ok(HttpResponseDeleted())
}

#[endpoint {
    method = GET,
    path = "/api/vcenter/cluster/modules/{module}/vm",
}]
pub async fn module_members(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<ModulePath>,
) -> std::result::Result<HttpResponseOk<ModuleMembers>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.modules.members(&path.into_inner().module)?))
}

#[endpoint {
    method = POST,
    path = "/api/vcenter/cluster/modules/{module}/vm",
}]
pub async fn module_update_members(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<ModulePath>,
    query: Query<ActionQuery>,
    body: TypedBody<ModuleMembers>,
) -> std::result::Result<HttpResponseOk<ModuleMembersResult>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let id = path.into_inner().module;
    let vms = body.into_inner().vms;
    let query = query.into_inner();
    let success = match action(&query) {
        "add" => {
            let inv = rqctx.context().inventory.lock().await;
            state.modules.add(&inv.registry, &id, &vms)?
        }
        "remove" => state.modules.remove(&id, &vms)?,
        other => return Err(unknown_action(other).into()),
    };
    Ok(HttpResponseOk(ModuleMembersResult { success }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;
    use crate::vim::option::Settings;
    use vcsim_config_toml::Model;

    #[test]
    fn module_membership() {
        let mut inv = Inventory::new(false, Settings::vpx());
        crate::model::populate(&mut inv, &Model::vpx()).unwrap();
        let cluster = inv.registry.all_of("ClusterComputeResource")[0].value.clone();
        let vm_in = |name: &str| {
            inv.registry
                .all_of("VirtualMachine")
                .into_iter()
                .find(|r| inv.registry.name(r) == Some(name))
                .unwrap()
                .value
        };
        let member = vm_in("DC0_C0_RP0_VM0");
        let outsider = vm_in("DC0_H0_VM0");

        let mut store = Store::default();
        assert!(matches!(
            store.create(&inv.registry, "domain-c0"),
            Err(Error::InvalidArgument(_))
        ));
        let id = store.create(&inv.registry, &cluster).unwrap();
        assert_eq!(store.list().summaries[0].cluster, cluster);

        assert!(!store.add(&inv.registry, &id, &[outsider.clone()]).unwrap());
        assert!(store.add(&inv.registry, &id, &[member.clone()]).unwrap());
        assert!(!store.add(&inv.registry, &id, &[member.clone()]).unwrap());
        assert_eq!(store.members(&id).unwrap().vms, vec![member.clone()]);

        assert!(!store.remove(&id, &[outsider]).unwrap());
        assert!(store.remove(&id, &[member]).unwrap());
        assert!(store.members(&id).unwrap().vms.is_empty());

        store.delete(&id).unwrap();
        assert!(matches!(store.members(&id), Err(Error::NotFound(_))));
    }
}
