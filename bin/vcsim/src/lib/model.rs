// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Populates an inventory from a [`Model`].
//!
//! A vCenter model creates, per datacenter `DC{d}`: `DC{d}_H{n}`
//! standalone hosts, `DC{d}_C{n}` clusters of `DC{d}_C{n}_H{m}` hosts with
//! child pools `DC{d}_C{n}_RP{p}`, `LocalDS_{n}` datastores, the `VM
//! Network` network and, when portgroups are requested, `DVS{d}` with its
//! `DC{d}_DVPG{n}` portgroups. Machines are named after the host or pool
//! they are placed in. An ESX model uses the fixed `ha-*` references of a
//! standalone host.

use vcsim_config_toml::Model;
use vim_api_types::mo::{
    self, DVPortgroupConfigInfo, DVSSummary, DatastoreInfo, DatastoreSummary,
    ManagedEntity, NetworkSummary,
};
use vim_api_types::vm::{
    VirtualDevice, VirtualDeviceBackingInfo, VirtualDeviceConfigSpec,
    VirtualDeviceConfigSpecOperation, VirtualMachineConfigSpec,
};
use vim_api_types::{MethodFault, MoRef};

use crate::inventory::Inventory;
use crate::registry::ManagedObject;
use crate::vim::compute::{self, FixedRefs};
use crate::vim::folder::{self, DatacenterRefs};
use crate::vim::{host, pool, vm};

const DATASTORE_CAPACITY: i64 = 1 << 40;
const DATASTORE_FREE: i64 = 1 << 39;
const DISK_KB: i64 = 1 << 20;
const ESX_HOST: &str = "localhost.localdomain";

/// Populates `inv` with the objects described by `model`.
pub fn populate(inv: &mut Inventory, model: &Model) -> Result<(), MethodFault> {
    let root = inv.registry.root_folder().clone();
    let root_name = if model.esx { "ha-folder-root" } else { "Datacenters" };
    inv.registry.insert(
        root.clone(),
        folder::new_folder(root_name, None, folder::DATACENTER_TYPES),
    );

    let mut parent = root.clone();
    for n in 0..model.folder {
        let f = folder::create_folder(inv, &root, &format!("F{n}"))?;
        if n == 0 {
            parent = f;
        }
    }
    for d in 0..model.datacenter {
        datacenter(inv, model, &parent, d)?;
    }

    if model.autostart {
        for r in inv.registry.all_of("VirtualMachine") {
            vm::set_power(inv, &r, vm::PowerOp::On, None, "")?;
        }
    }
    Ok(())
}

fn datacenter(
    inv: &mut Inventory,
    model: &Model,
    parent: &MoRef,
    d: usize,
) -> Result<(), MethodFault> {
    let (name, fixed) = match model.esx {
        true => (
            "ha-datacenter".to_string(),
            Some(DatacenterRefs {
                datacenter: MoRef::new("Datacenter", "ha-datacenter"),
                vm: MoRef::new("Folder", "ha-folder-vm"),
                host: MoRef::new("Folder", "ha-folder-host"),
                datastore: MoRef::new("Folder", "ha-folder-datastore"),
                network: MoRef::new("Folder", "ha-folder-network"),
            }),
        ),
        false => (format!("DC{d}"), None),
    };
    let dc = folder::create_datacenter(inv, parent, &name, fixed)?;
    let folders = inv.registry.datacenter(&dc)?.clone();

    let net = network(inv, &dc, &folders.network_folder, "VM Network")?;
    for n in 0..model.datastore {
        datastore(inv, &dc, &folders.datastore_folder, &format!("LocalDS_{n}"))?;
    }
    if model.portgroup > 0 {
        switch(inv, &dc, &folders.network_folder, d, model.portgroup)?;
    }

    let prefix = format!("DC{d}");
    for h in 0..model.host {
        let (name, fixed, host_ref, vm_prefix) = match model.esx {
            true => (
                ESX_HOST.to_string(),
                Some(FixedRefs {
                    compute: MoRef::new("ComputeResource", "ha-compute-res"),
                    pool: MoRef::new("ResourcePool", "ha-root-pool"),
                }),
                Some(MoRef::new("HostSystem", "ha-host")),
                "ha-host".to_string(),
            ),
            false => {
                let name = format!("{prefix}_H{h}");
                (name.clone(), None, None, name)
            }
        };
        let compute = compute::create(inv, &folders.host_folder, &name, None, fixed)?;
        let host = host::add(inv, &compute, &name, host_ref, true)?;
        let root_pool = root_pool(inv, &compute)?;
        machines(inv, model, &folders.vm_folder, &root_pool, Some(&host), &net, &vm_prefix)?;
    }

    for c in 0..model.cluster {
        let name = format!("{prefix}_C{c}");
        let cluster = compute::create(
            inv,
            &folders.host_folder,
            &name,
            Some(Default::default()),
            None,
        )?;
        for h in 0..model.cluster_host {
            host::add(inv, &cluster, &format!("{name}_H{h}"), None, true)?;
        }
        let root_pool = root_pool(inv, &cluster)?;
        machines(
            inv,
            model,
            &folders.vm_folder,
            &root_pool,
            None,
            &net,
            &format!("{name}_RP0"),
        )?;
        for p in 1..=model.pool {
            pool::create(inv, &root_pool, &format!("{name}_RP{p}"), Default::default())?;
        }
    }
    Ok(())
}

fn root_pool(inv: &Inventory, compute: &MoRef) -> Result<MoRef, MethodFault> {
    inv.registry
        .compute(compute)?
        .resource_pool
        .clone()
        .ok_or_else(|| MethodFault::not_found(compute.clone()))
}

fn network(
    inv: &mut Inventory,
    dc: &MoRef,
    folder: &MoRef,
    name: &str,
) -> Result<MoRef, MethodFault> {
    let r = inv.registry.new_ref("Network");
    inv.registry.insert(
        r.clone(),
        ManagedObject::Network(mo::Network {
            entity: ManagedEntity::new(name, Some(folder.clone())),
            summary: NetworkSummary {
                network: Some(r.clone()),
                name: name.to_string(),
                accessible: true,
            },
            host: Vec::new(),
            vm: Vec::new(),
        }),
    );
    inv.registry.folder_mut(folder)?.child_entity.push(r.clone());
    inv.registry.datacenter_mut(dc)?.network.push(r.clone());
    Ok(r)
}

fn datastore(
    inv: &mut Inventory,
    dc: &MoRef,
    folder: &MoRef,
    name: &str,
) -> Result<MoRef, MethodFault> {
    let r = inv.registry.new_ref("Datastore");
    let url = format!("ds:///vmfs/volumes/{}/", uuid::Uuid::new_v4());
    inv.registry.insert(
        r.clone(),
        ManagedObject::Datastore(mo::Datastore {
            entity: ManagedEntity::new(name, Some(folder.clone())),
            summary: DatastoreSummary {
                datastore: Some(r.clone()),
                name: name.to_string(),
                url: url.clone(),
                capacity: DATASTORE_CAPACITY,
                free_space: DATASTORE_FREE,
                kind: "VMFS".into(),
                accessible: true,
                maintenance_mode: Some("normal".into()),
            },
            info: DatastoreInfo {
                name: name.to_string(),
                url,
                free_space: DATASTORE_FREE,
                max_file_size: DATASTORE_CAPACITY,
            },
            host: Vec::new(),
            vm: Vec::new(),
        }),
    );
    inv.registry.folder_mut(folder)?.child_entity.push(r.clone());
    inv.registry.datacenter_mut(dc)?.datastore.push(r.clone());
    Ok(r)
}

fn switch(
    inv: &mut Inventory,
    dc: &MoRef,
    folder: &MoRef,
    d: usize,
    portgroups: usize,
) -> Result<(), MethodFault> {
    let name = format!("DVS{d}");
    let uuid = uuid::Uuid::new_v4().to_string();
    let dvs = inv.registry.new_ref("VmwareDistributedVirtualSwitch");
    inv.registry.insert(
        dvs.clone(),
        ManagedObject::Switch(mo::DistributedVirtualSwitch {
            entity: ManagedEntity::new(&name, Some(folder.clone())),
            uuid: uuid.clone(),
            summary: DVSSummary {
                name: name.clone(),
                uuid,
                num_ports: 0,
                host_member: Vec::new(),
            },
            portgroup: Vec::new(),
        }),
    );
    inv.registry.folder_mut(folder)?.child_entity.push(dvs.clone());

    for n in 0..portgroups {
        let pg_name = format!("DC{d}_DVPG{n}");
        let r = inv.registry.new_ref("DistributedVirtualPortgroup");
        inv.registry.insert(
            r.clone(),
            ManagedObject::Portgroup(mo::DistributedVirtualPortgroup {
                network: mo::Network {
                    entity: ManagedEntity::new(&pg_name, Some(folder.clone())),
                    summary: NetworkSummary {
                        network: Some(r.clone()),
                        name: pg_name.clone(),
                        accessible: true,
                    },
                    host: Vec::new(),
                    vm: Vec::new(),
                },
                key: r.value.clone(),
                config: DVPortgroupConfigInfo {
                    key: r.value.clone(),
                    name: pg_name,
                    num_ports: 128,
                    distributed_virtual_switch: dvs.clone(),
                    kind: "earlyBinding".into(),
                },
            }),
        );
        inv.registry.folder_mut(folder)?.child_entity.push(r.clone());
        inv.registry.datacenter_mut(dc)?.network.push(r.clone());
        let s = inv.registry.switch_mut(&dvs)?;
        s.portgroup.push(r);
        s.summary.num_ports += 128;
    }
    Ok(())
}

fn add(device: VirtualDevice) -> VirtualDeviceConfigSpec {
    VirtualDeviceConfigSpec {
        operation: Some(VirtualDeviceConfigSpecOperation::Add),
        file_operation: None,
        device,
    }
}

/// Hardware of a modelled machine: a SCSI disk and a NIC on `net`.
fn devices(net: &MoRef, net_name: &str) -> Vec<VirtualDeviceConfigSpec> {
    vec![
        add(VirtualDevice {
            kind: "VirtualLsiLogicController".into(),
            key: -100,
            ..Default::default()
        }),
        add(VirtualDevice {
            kind: "VirtualDisk".into(),
            key: -1,
            controller_key: Some(-100),
            capacity_in_kb: Some(DISK_KB),
            ..Default::default()
        }),
        add(VirtualDevice {
            kind: "VirtualE1000".into(),
            key: -2,
            backing: Some(VirtualDeviceBackingInfo {
                device_name: Some(net_name.to_string()),
                network: Some(net.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }),
    ]
}

fn machines(
    inv: &mut Inventory,
    model: &Model,
    folder: &MoRef,
    pool: &MoRef,
    host: Option<&MoRef>,
    net: &MoRef,
    prefix: &str,
) -> Result<(), MethodFault> {
    let net_name = inv.registry.name(net).unwrap_or_default().to_string();
    for n in 0..model.machine {
        let spec = VirtualMachineConfigSpec {
            name: Some(format!("{prefix}_VM{n}")),
            guest_id: Some("otherGuest".into()),
            num_cpus: Some(1),
            memory_mb: Some(32),
            device_change: devices(net, &net_name),
            ..Default::default()
        };
        vm::create(inv, folder, pool, host, spec, "")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::option::Settings;
    use vim_api_types::mo::VirtualMachinePowerState;

    fn build(model: &Model) -> Inventory {
        let mut inv = Inventory::new(model.esx, Settings::default());
        populate(&mut inv, model).unwrap();
        inv
    }

    fn names(inv: &Inventory, kind: &str) -> Vec<String> {
        let mut names: Vec<String> = inv
            .registry
            .all_of(kind)
            .iter()
            .filter_map(|r| inv.registry.name(r).map(str::to_string))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn vpx_inventory_matches_counts() {
        let model = Model::vpx();
        let inv = build(&model);
        let count = model.count();

        assert_eq!(inv.registry.all_of("Datacenter").len(), count.datacenter);
        assert_eq!(inv.registry.all_of("HostSystem").len(), count.host);
        assert_eq!(inv.registry.all_of("ClusterComputeResource").len(), count.cluster);
        assert_eq!(inv.registry.all_of("ResourcePool").len(), count.pool);
        assert_eq!(inv.registry.all_of("VirtualMachine").len(), count.machine);
        assert_eq!(inv.registry.all_of("Datastore").len(), count.datastore);
        assert_eq!(
            inv.registry.all_of("DistributedVirtualPortgroup").len(),
            count.portgroup
        );

        assert_eq!(
            names(&inv, "VirtualMachine"),
            vec!["DC0_C0_RP0_VM0", "DC0_C0_RP0_VM1", "DC0_H0_VM0", "DC0_H0_VM1"]
        );
        assert_eq!(names(&inv, "ResourcePool"), vec!["DC0_C0_RP1", "Resources", "Resources"]);
        assert_eq!(
            names(&inv, "HostSystem"),
            vec!["DC0_C0_H0", "DC0_C0_H1", "DC0_C0_H2", "DC0_H0"]
        );
    }

    #[test]
    fn machines_are_wired_up() {
        let inv = build(&Model::vpx());
        for r in inv.registry.all_of("VirtualMachine") {
            let v = inv.registry.vm(&r).unwrap();
            assert_eq!(v.runtime.power_state, VirtualMachinePowerState::PoweredOn);
            assert_eq!(v.datastore.len(), 1);
            assert_eq!(v.network.len(), 1);
            let host = v.runtime.host.clone().unwrap();
            assert!(inv.registry.host(&host).unwrap().vm.contains(&r));
            assert_eq!(
                inv.registry.inventory_path(&r),
                format!("/DC0/vm/{}", v.entity.name)
            );
            assert!(v.config.hardware.device.iter().any(|d| d.is_disk()));
        }
    }

    #[test]
    fn esx_uses_fixed_references() {
        let inv = build(&Model::esx());
        assert!(inv.registry.contains(&MoRef::new("HostSystem", "ha-host")));
        assert!(inv.registry.contains(&MoRef::new("Datacenter", "ha-datacenter")));
        assert!(inv.registry.contains(&MoRef::new("ResourcePool", "ha-root-pool")));
        assert_eq!(names(&inv, "VirtualMachine"), vec!["ha-host_VM0", "ha-host_VM1"]);
        assert_eq!(inv.registry.root_folder(), &MoRef::new("Folder", "ha-folder-root"));
    }

    #[test]
    fn folders_hold_datacenters() {
        let inv = build(&Model { folder: 2, autostart: false, ..Model::vpx() });
        let dc = inv.registry.all_of("Datacenter")[0].clone();
        assert_eq!(inv.registry.inventory_path(&dc), "/F0/DC0");
        assert_eq!(names(&inv, "Folder").iter().filter(|n| n.starts_with('F')).count(), 2);
        let vm = inv.registry.all_of("VirtualMachine")[0].clone();
        assert_eq!(
            inv.registry.vm(&vm).unwrap().runtime.power_state,
            VirtualMachinePowerState::PoweredOff
        );
    }
}
