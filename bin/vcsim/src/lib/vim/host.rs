// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `HostSystem`: construction, storage and network attachment, maintenance
//! mode and connection state.

use chrono::Utc;
use serde_json::Value;
use vim_api_types::methods::EnterMaintenanceModeRequest;
use vim_api_types::mo::{
    self, DatastoreHostMount, HostConfigSummary, HostHardwareSummary,
    HostListSummary, HostMountInfo, HostRuntimeInfo, HostSystemConnectionState,
    HostSystemPowerState, ManagedEntity, ManagedEntityStatus,
    VirtualMachinePowerState,
};
use vim_api_types::{MethodFault, MoRef};

use super::task::{self, Outcome};
use super::{compute, decode, entity, event, Call, MethodResult};
use crate::inventory::{esx_about, Inventory};
use crate::registry::ManagedObject;

const MEMORY_SIZE: i64 = 4_294_430_720;

fn hardware() -> HostHardwareSummary {
    HostHardwareSummary {
        vendor: "VMware, Inc. (vcsim)".into(),
        model: "VMware Virtual Platform".into(),
        uuid: uuid::Uuid::new_v4().to_string(),
        memory_size: MEMORY_SIZE,
        cpu_model: "Intel(R) Core(TM) i7-3615QM CPU @ 2.30GHz".into(),
        cpu_mhz: 2294,
        num_cpu_pkgs: 1,
        num_cpu_cores: 2,
        num_cpu_threads: 2,
        num_nics: 1,
    }
}

pub fn new_host(name: &str, parent: &MoRef, connected: bool) -> mo::HostSystem {
    let runtime = HostRuntimeInfo {
        connection_state: match connected {
            true => HostSystemConnectionState::Connected,
            false => HostSystemConnectionState::Disconnected,
        },
        power_state: HostSystemPowerState::PoweredOn,
        in_maintenance_mode: false,
        boot_time: Some(Utc::now()),
    };
    mo::HostSystem {
        entity: ManagedEntity::new(name, Some(parent.clone())),
        runtime: runtime.clone(),
        summary: HostListSummary {
            hardware: hardware(),
            runtime,
            config: HostConfigSummary {
                name: name.to_string(),
                port: 443,
                product: esx_about(uuid::Uuid::new_v4().to_string()),
            },
            overall_status: ManagedEntityStatus::Green,
        },
        vm: Vec::new(),
        datastore: Vec::new(),
        network: Vec::new(),
    }
}

/// Adds a host to compute resource `compute` under reference `r`, or a
/// fresh one, and mounts the datacenter's datastores and networks on it.
pub fn add(
    inv: &mut Inventory,
    compute: &MoRef,
    name: &str,
    r: Option<MoRef>,
    connected: bool,
) -> Result<MoRef, MethodFault> {
    inv.registry.compute(compute)?;
    let host = new_host(name, compute, connected);
    let host_ref = match r {
        Some(r) => {
            inv.registry.insert(r.clone(), ManagedObject::HostSystem(host));
            r
        }
        None => inv.registry.put(ManagedObject::HostSystem(host)),
    };
    inv.registry.compute_mut(compute)?.host.push(host_ref.clone());
    attach(inv, &host_ref)?;
    compute::refresh_summary(inv, compute)?;
    Ok(host_ref)
}

fn push_unique(list: &mut Vec<MoRef>, r: &MoRef) {
    if !list.contains(r) {
        list.push(r.clone());
    }
}

/// Mounts every datastore and network of the host's datacenter.
pub fn attach(inv: &mut Inventory, host: &MoRef) -> Result<(), MethodFault> {
    let Some(dc) = inv.registry.datacenter_of(host) else {
        return Ok(());
    };
    let dc = inv.registry.datacenter(&dc)?.clone();
    let compute = inv.registry.entity(host)?.parent.clone();

    for ds in &dc.datastore {
        let d = inv.registry.datastore_mut(ds)?;
        if !d.host.iter().any(|m| &m.key == host) {
            d.host.push(DatastoreHostMount {
                key: host.clone(),
                mount_info: HostMountInfo {
                    path: format!("/vmfs/volumes/{}", d.entity.name),
                    access_mode: "readWrite".into(),
                    mounted: true,
                    accessible: true,
                },
            });
        }
        push_unique(&mut inv.registry.host_mut(host)?.datastore, ds);
        if let Some(c) = &compute {
            push_unique(&mut inv.registry.compute_mut(c)?.datastore, ds);
        }
    }

    for net in &dc.network {
        match inv.registry.get_mut(net) {
            Some(ManagedObject::Network(n)) => push_unique(&mut n.host, host),
            Some(ManagedObject::Portgroup(pg)) => {
                push_unique(&mut pg.network.host, host);
                let dvs = pg.config.distributed_virtual_switch.clone();
                if let Ok(s) = inv.registry.switch_mut(&dvs) {
                    push_unique(&mut s.summary.host_member, host);
                }
            }
            _ => continue,
        }
        push_unique(&mut inv.registry.host_mut(host)?.network, net);
        if let Some(c) = &compute {
            push_unique(&mut inv.registry.compute_mut(c)?.network, net);
        }
    }
    Ok(())
}

/// Returns true if VMs may be powered on or placed on `host`.
pub fn is_usable(host: &mo::HostSystem) -> bool {
    host.runtime.connection_state == HostSystemConnectionState::Connected
        && !host.runtime.in_maintenance_mode
}

fn update_runtime<F>(inv: &mut Inventory, r: &MoRef, f: F) -> Result<(), MethodFault>
where
    F: FnOnce(&mut HostRuntimeInfo),
{
    let host = inv.registry.host_mut(r)?;
    f(&mut host.runtime);
    host.summary.runtime = host.runtime.clone();
    let compute = host.entity.parent.clone();
    if let Some(c) = compute {
        compute::refresh_summary(inv, &c)?;
    }
    Ok(())
}

fn enter_maintenance(inv: &mut Inventory, r: &MoRef, user: &str) -> Outcome {
    let host = inv.registry.host(r)?;
    let busy = host.vm.iter().any(|vm| {
        inv.registry
            .vm(vm)
            .is_ok_and(|vm| vm.runtime.power_state == VirtualMachinePowerState::PoweredOn)
    });
    if busy {
        return Err(MethodFault::InvalidState);
    }
    update_runtime(inv, r, |rt| rt.in_maintenance_mode = true)?;
    let name = inv.registry.name(r).unwrap_or_default().to_string();
    event::post(
        inv,
        "EnteredMaintenanceModeEvent",
        user,
        Some(r),
        format!("Host {name} has entered maintenance mode"),
    );
    Ok(None)
}

fn exit_maintenance(inv: &mut Inventory, r: &MoRef, user: &str) -> Outcome {
    update_runtime(inv, r, |rt| rt.in_maintenance_mode = false)?;
    let name = inv.registry.name(r).unwrap_or_default().to_string();
    event::post(
        inv,
        "ExitMaintenanceModeEvent",
        user,
        Some(r),
        format!("Host {name} has exited maintenance mode"),
    );
    Ok(None)
}

fn set_connection(
    inv: &mut Inventory,
    r: &MoRef,
    state: HostSystemConnectionState,
    user: &str,
) -> Outcome {
    update_runtime(inv, r, |rt| rt.connection_state = state)?;
    let name = inv.registry.name(r).unwrap_or_default().to_string();
    let (kind, message) = match state {
        HostSystemConnectionState::Connected => {
            ("HostConnectedEvent", format!("Connected to {name}"))
        }
        _ => ("HostDisconnectedEvent", format!("Disconnected from {name}")),
    };
    event::post(inv, kind, user, Some(r), message);
    Ok(None)
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    let r = this.clone();
    let user = call.user();
    match method {
        "EnterMaintenanceMode_Task" => {
            let _: EnterMaintenanceModeRequest = decode(args)?;
            task::run(call, this, method, move |inv| enter_maintenance(inv, &r, &user))
        }
        "ExitMaintenanceMode_Task" => {
            task::run(call, this, method, move |inv| exit_maintenance(inv, &r, &user))
        }
        "DisconnectHost_Task" => task::run(call, this, method, move |inv| {
            set_connection(inv, &r, HostSystemConnectionState::Disconnected, &user)
        }),
        "ReconnectHost_Task" => task::run(call, this, method, move |inv| {
            set_connection(inv, &r, HostSystemConnectionState::Connected, &user)
        }),
        _ => entity::dispatch(call, this, method, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::testing::{context, login, run_task};
    use serde_json::json;

    #[tokio::test]
    async fn maintenance_mode_requires_idle_host() {
        let ctx = context();
        let key = login(&ctx).await;
        let (host, vms) = {
            let inv = ctx.inventory.lock().await;
            let host = inv
                .registry
                .all_of("HostSystem")
                .into_iter()
                .find(|h| !inv.registry.host(h).unwrap().vm.is_empty())
                .unwrap();
            let vms = inv.registry.host(&host).unwrap().vm.clone();
            (host, vms)
        };

        let err = run_task(&ctx, &key, &host, "EnterMaintenanceMode_Task", json!({"timeout": 0}))
            .await
            .unwrap_err();
        assert_eq!(err, MethodFault::InvalidState);

        for vm in &vms {
            run_task(&ctx, &key, vm, "PowerOffVM_Task", Value::Null).await.unwrap();
        }
        run_task(&ctx, &key, &host, "EnterMaintenanceMode_Task", json!({"timeout": 0}))
            .await
            .unwrap();
        {
            let inv = ctx.inventory.lock().await;
            let h = inv.registry.host(&host).unwrap();
            assert!(h.runtime.in_maintenance_mode);
            assert!(h.summary.runtime.in_maintenance_mode);
        }

        let err = run_task(&ctx, &key, &vms[0], "PowerOnVM_Task", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err, MethodFault::InvalidState);

        run_task(&ctx, &key, &host, "ExitMaintenanceMode_Task", Value::Null).await.unwrap();
        run_task(&ctx, &key, &vms[0], "PowerOnVM_Task", Value::Null).await.unwrap();
    }

    #[tokio::test]
    async fn connection_state() {
        let ctx = context();
        let key = login(&ctx).await;
        let host = ctx.inventory.lock().await.registry.all_of("HostSystem")[0].clone();

        run_task(&ctx, &key, &host, "DisconnectHost_Task", Value::Null).await.unwrap();
        {
            let inv = ctx.inventory.lock().await;
            let h = inv.registry.host(&host).unwrap();
            assert_eq!(h.runtime.connection_state, HostSystemConnectionState::Disconnected);
            assert!(!is_usable(h));
            let latest = inv.events.latest().unwrap();
            assert_eq!(latest.kind, "HostDisconnectedEvent");
        }
        run_task(&ctx, &key, &host, "ReconnectHost_Task", Value::Null).await.unwrap();
        let inv = ctx.inventory.lock().await;
        assert!(is_usable(inv.registry.host(&host).unwrap()));
    }

    #[tokio::test]
    async fn hosts_mount_datacenter_storage() {
        let ctx = context();
        let inv = ctx.inventory.lock().await;
        let datastores = inv.registry.all_of("Datastore");
        for host in inv.registry.all_of("HostSystem") {
            let h = inv.registry.host(&host).unwrap();
            assert_eq!(h.datastore, datastores);
            for ds in &datastores {
                let mounts = &inv.registry.datastore(ds).unwrap().host;
                assert!(mounts.iter().any(|m| m.key == host));
            }
        }
    }
}
