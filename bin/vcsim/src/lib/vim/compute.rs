// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `ComputeResource` and `ClusterComputeResource`.

use serde_json::Value;
use vim_api_types::methods::{AddHostRequest, ReconfigureComputeResourceRequest};
use vim_api_types::mo::{self, ClusterConfigInfoEx, ManagedEntity, ResourceConfigSpec};
use vim_api_types::vm::{ClusterConfigSpecEx, HostConnectSpec};
use vim_api_types::{MethodFault, MoRef};

use super::task::{self, Outcome};
use super::{decode, encode, entity, host, method_not_found, pool, Call, MethodResult};
use crate::inventory::Inventory;
use crate::registry::ManagedObject;

/// Name of the root resource pool of every compute resource.
pub const ROOT_POOL: &str = "Resources";

/// Fixed references for a compute resource and its root pool.
pub struct FixedRefs {
    pub compute: MoRef,
    pub pool: MoRef,
}

/// Creates a compute resource, or a cluster when `config` is given, in
/// `folder` together with its root pool.
pub fn create(
    inv: &mut Inventory,
    folder: &MoRef,
    name: &str,
    config: Option<ClusterConfigInfoEx>,
    fixed: Option<FixedRefs>,
) -> Result<MoRef, MethodFault> {
    entity::validate_name(&inv.registry, Some(folder), name, None)?;
    let compute = mo::ComputeResource {
        entity: ManagedEntity::new(name, Some(folder.clone())),
        configuration_ex: config.clone(),
        ..Default::default()
    };
    let obj = match config {
        Some(_) => ManagedObject::Cluster(compute),
        None => ManagedObject::ComputeResource(compute),
    };
    let (compute, pool_ref) = match fixed {
        Some(refs) => (refs.compute, Some(refs.pool)),
        None => (inv.registry.new_ref(obj.kind()), None),
    };
    inv.registry.insert(compute.clone(), obj);

    let root = pool::new_pool(ROOT_POOL, &compute, &compute, ResourceConfigSpec::default());
    let root = match pool_ref {
        Some(r) => {
            inv.registry.insert(r.clone(), root);
            r
        }
        None => inv.registry.put(root),
    };
    inv.registry.compute_mut(&compute)?.resource_pool = Some(root);
    inv.registry.folder_mut(folder)?.child_entity.push(compute.clone());
    Ok(compute)
}

/// Recomputes the capacity summary of `r` from its hosts.
pub fn refresh_summary(inv: &mut Inventory, r: &MoRef) -> Result<(), MethodFault> {
    let hosts = inv.registry.compute(r)?.host.clone();
    let mut summary = mo::ComputeResourceSummary::default();
    for h in &hosts {
        let host = inv.registry.host(h)?;
        let hw = &host.summary.hardware;
        summary.num_hosts += 1;
        summary.total_cpu += hw.cpu_mhz * i32::from(hw.num_cpu_cores);
        summary.total_memory += hw.memory_size;
        summary.num_cpu_cores += hw.num_cpu_cores;
        summary.num_cpu_threads += hw.num_cpu_threads;
        if host::is_usable(host) {
            summary.num_effective_hosts += 1;
            summary.effective_cpu += hw.cpu_mhz * i32::from(hw.num_cpu_cores);
            summary.effective_memory += hw.memory_size >> 20;
        }
    }
    inv.registry.compute_mut(r)?.summary = summary;
    Ok(())
}

/// Adds a host described by `spec` to `compute`.
pub fn add_host(
    inv: &mut Inventory,
    compute: &MoRef,
    spec: &HostConnectSpec,
    connected: bool,
) -> Result<MoRef, MethodFault> {
    let name = match spec.host_name.as_deref() {
        Some(name) if !name.is_empty() => name,
        _ => return Err(MethodFault::invalid_argument("spec.hostName")),
    };
    let existing = inv
        .registry
        .compute(compute)?
        .host
        .iter()
        .find(|h| inv.registry.name(h) == Some(name))
        .cloned();
    if let Some(object) = existing {
        return Err(MethodFault::DuplicateName { name: name.to_string(), object });
    }
    host::add(inv, compute, name, None, connected)
}

fn reconfigure(
    inv: &mut Inventory,
    r: &MoRef,
    spec: ClusterConfigSpecEx,
    modify: bool,
) -> Outcome {
    let compute = inv.registry.compute_mut(r)?;
    let mut config = match modify {
        true => compute.configuration_ex.clone().unwrap_or_default(),
        false => ClusterConfigInfoEx::default(),
    };
    if let Some(drs) = spec.drs_config {
        config.drs_config = drs;
    }
    if let Some(das) = spec.das_config {
        config.das_config = das;
    }
    compute.configuration_ex = Some(config);
    Ok(None)
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    let r = this.clone();
    match method {
        "AddHost_Task" => {
            if this.kind != "ClusterComputeResource" {
                return Err(method_not_found(this, method));
            }
            let req: AddHostRequest = decode(args)?;
            task::run(call, this, method, move |inv| {
                let host = add_host(inv, &r, &req.spec, req.as_connected)?;
                Ok(Some(encode(&host)?))
            })
        }
        "ReconfigureComputeResource_Task" => {
            let req: ReconfigureComputeResourceRequest = decode(args)?;
            task::run(call, this, method, move |inv| {
                reconfigure(inv, &r, req.spec, req.modify)
            })
        }
        _ => entity::dispatch(call, this, method, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::task::Outcome;
    use crate::vim::testing::{context, login, run_task};
    use serde_json::json;

    fn created(outcome: Outcome) -> MoRef {
        serde_json::from_value(outcome.unwrap().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn add_host_to_cluster() {
        let ctx = context();
        let key = login(&ctx).await;
        let cluster =
            ctx.inventory.lock().await.registry.all_of("ClusterComputeResource")[0].clone();
        let before = ctx.inventory.lock().await.registry.compute(&cluster).unwrap().summary.num_hosts;

        let host = created(
            run_task(
                &ctx,
                &key,
                &cluster,
                "AddHost_Task",
                json!({"spec": {"hostName": "esx.example.com"}, "asConnected": true}),
            )
            .await,
        );
        {
            let inv = ctx.inventory.lock().await;
            let c = inv.registry.compute(&cluster).unwrap();
            assert!(c.host.contains(&host));
            assert_eq!(c.summary.num_hosts, before + 1);
            assert_eq!(inv.registry.entity(&host).unwrap().parent, Some(cluster.clone()));
            assert!(!inv.registry.host(&host).unwrap().datastore.is_empty());
        }

        let err = run_task(
            &ctx,
            &key,
            &cluster,
            "AddHost_Task",
            json!({"spec": {"hostName": "esx.example.com"}}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MethodFault::DuplicateName { .. }));

        let err = run_task(&ctx, &key, &cluster, "AddHost_Task", json!({"spec": {}}))
            .await
            .unwrap_err();
        assert_eq!(err, MethodFault::invalid_argument("spec.hostName"));
    }

    #[tokio::test]
    async fn reconfigure_merges_when_modifying() {
        let ctx = context();
        let key = login(&ctx).await;
        let cluster =
            ctx.inventory.lock().await.registry.all_of("ClusterComputeResource")[0].clone();

        run_task(
            &ctx,
            &key,
            &cluster,
            "ReconfigureComputeResource_Task",
            json!({"spec": {"drsConfig": {"enabled": true}}, "modify": true}),
        )
        .await
        .unwrap();
        run_task(
            &ctx,
            &key,
            &cluster,
            "ReconfigureComputeResource_Task",
            json!({"spec": {"dasConfig": {"enabled": true}}, "modify": true}),
        )
        .await
        .unwrap();
        {
            let inv = ctx.inventory.lock().await;
            let config = inv.registry.compute(&cluster).unwrap().configuration_ex.clone().unwrap();
            assert_eq!(config.drs_config.enabled, Some(true));
            assert_eq!(config.das_config.enabled, Some(true));
        }

        run_task(
            &ctx,
            &key,
            &cluster,
            "ReconfigureComputeResource_Task",
            json!({"spec": {}, "modify": false}),
        )
        .await
        .unwrap();
        let inv = ctx.inventory.lock().await;
        let config = inv.registry.compute(&cluster).unwrap().configuration_ex.clone().unwrap();
        assert_eq!(config.drs_config.enabled, None);
    }

    #[tokio::test]
    async fn standalone_compute_has_no_add_host() {
        let ctx = context();
        let key = login(&ctx).await;
        let compute = ctx.inventory.lock().await.registry.all_of("ComputeResource")[0].clone();
        let err = run_task(&ctx, &key, &compute, "AddHost_Task", json!({"spec": {}}))
            .await
            .unwrap_err();
        assert!(matches!(err, MethodFault::MethodNotFound { .. }));
    }
}
