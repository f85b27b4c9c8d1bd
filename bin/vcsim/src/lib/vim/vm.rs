// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `VirtualMachine`: creation, power, reconfiguration, cloning, relocation,
//! templates and snapshots.
//!
//! Every change goes through [`refresh`] so that `summary` mirrors
//! `config`, `runtime` and `guest`, and through [`relink`] so that the
//! datastores and networks list the machines using them.

use std::collections::BTreeMap;

use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use vim_api_types::methods::{
    CloneVmRequest, CreateSnapshotRequest, MarkAsVirtualMachineRequest,
    PowerOnVmRequest, ReconfigVmRequest, RelocateVmRequest,
};
use vim_api_types::mo::{
    self, GuestInfo, ManagedEntity, ManagedEntityStatus, VirtualHardware,
    VirtualMachineConfigInfo, VirtualMachineConfigSummary,
    VirtualMachineConnectionState, VirtualMachinePowerState,
    VirtualMachineRuntimeInfo, VirtualMachineSummary,
};
use vim_api_types::vm::{
    Description, VirtualDevice, VirtualDeviceBackingInfo,
    VirtualDeviceConfigSpec, VirtualDeviceConfigSpecOperation,
    VirtualDeviceConnectInfo, VirtualMachineCloneSpec, VirtualMachineConfigSpec,
    VirtualMachineFileInfo, VirtualMachineRelocateSpec,
};
use vim_api_types::{MethodFault, MoRef, OptionValue};

use super::task::{self, Outcome};
use super::{decode, encode, entity, event, folder, host, snapshot, Call, MethodResult};
use crate::inventory::Inventory;
use crate::registry::{ManagedObject, Registry};

const DEFAULT_GUEST: &str = "otherGuest";
const DEFAULT_MEMORY_MB: i32 = 32;
const DEFAULT_VERSION: &str = "vmx-13";

/// Prefix of extraConfig keys which set a property instead of an option.
const SET_PREFIX: &str = "SET.";

pub fn guest_full_name(guest_id: &str) -> String {
    match guest_id {
        "otherGuest" => "Other (32-bit)".into(),
        "otherGuest64" => "Other (64-bit)".into(),
        "otherLinux64Guest" => "Other Linux (64-bit)".into(),
        "ubuntu64Guest" => "Ubuntu Linux (64-bit)".into(),
        "centos64Guest" => "CentOS 4/5 or later (64-bit)".into(),
        "rhel8_64Guest" => "Red Hat Enterprise Linux 8 (64-bit)".into(),
        "windows9Server64Guest" => "Microsoft Windows Server 2016 (64-bit)".into(),
        other => other.to_string(),
    }
}

fn device(kind: &str, key: i32, label: &str) -> VirtualDevice {
    VirtualDevice {
        kind: kind.to_string(),
        key,
        device_info: Some(Description {
            label: label.to_string(),
            summary: label.to_string(),
        }),
        ..Default::default()
    }
}

/// Devices present in every new virtual machine.
fn default_devices() -> Vec<VirtualDevice> {
    vec![
        device("VirtualIDEController", 200, "IDE 0"),
        device("VirtualIDEController", 201, "IDE 1"),
        device("VirtualPS2Controller", 300, "PS2 controller 0"),
        device("VirtualPCIController", 100, "PCI controller 0"),
        device("VirtualSIOController", 400, "SIO controller 0"),
        device("VirtualKeyboard", 600, "Keyboard "),
        device("VirtualPointingDevice", 700, "Pointing device"),
        device("VirtualMachineVideoCard", 500, "Video card "),
    ]
}

/// Splits `[datastore] path` into its datastore name and path.
pub fn parse_datastore_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.trim().strip_prefix('[')?;
    let (ds, file) = rest.split_once(']')?;
    Some((ds, file.trim_start()))
}

fn find_named(
    reg: &Registry,
    kinds: &[&str],
    dc: Option<&MoRef>,
    name: &str,
) -> Option<MoRef> {
    kinds
        .iter()
        .flat_map(|kind| reg.all_of(kind))
        .filter(|r| dc.is_none() || reg.datacenter_of(r).as_ref() == dc)
        .find(|r| reg.name(r) == Some(name))
}

pub fn find_datastore(reg: &Registry, dc: Option<&MoRef>, name: &str) -> Option<MoRef> {
    find_named(reg, &["Datastore"], dc, name)
}

pub fn find_network(reg: &Registry, dc: Option<&MoRef>, name: &str) -> Option<MoRef> {
    find_named(reg, &["Network", "DistributedVirtualPortgroup"], dc, name)
}

fn random_mac() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "00:50:56:{:02x}:{:02x}:{:02x}",
        rng.gen_range(0..0x40u8),
        rng.gen::<u8>(),
        rng.gen::<u8>()
    )
}

fn disk_file(datastore: &str, vm: &str, index: usize) -> String {
    match index {
        0 => format!("[{datastore}] {vm}/{vm}.vmdk"),
        n => format!("[{datastore}] {vm}/{vm}_{n}.vmdk"),
    }
}

/// Datastore holding the machine's configuration file.
fn home_datastore(config: &VirtualMachineConfigInfo) -> String {
    config
        .files
        .vm_path_name
        .as_deref()
        .and_then(parse_datastore_path)
        .map(|(ds, _)| ds.to_string())
        .unwrap_or_default()
}

/// Brings `summary` in line with the rest of the machine.
pub fn refresh(vm: &mut mo::VirtualMachine) {
    let c = &vm.config;
    vm.summary.config = VirtualMachineConfigSummary {
        name: c.name.clone(),
        template: c.template,
        vm_path_name: c.files.vm_path_name.clone().unwrap_or_default(),
        memory_size_mb: c.hardware.memory_mb,
        num_cpu: c.hardware.num_cpu,
        guest_id: c.guest_id.clone(),
        guest_full_name: c.guest_full_name.clone(),
        uuid: c.uuid.clone(),
        instance_uuid: c.instance_uuid.clone(),
        annotation: c.annotation.clone(),
    };
    vm.summary.runtime = vm.runtime.clone();
    vm.summary.guest = vm.guest.clone();
}

fn sync_membership(list: &mut Vec<MoRef>, vm: &MoRef, member: bool) {
    let present = list.contains(vm);
    if member && !present {
        list.push(vm.clone());
    } else if !member && present {
        list.retain(|x| x != vm);
    }
}

/// Recomputes the datastores and networks used by `r` from its files and
/// network adapters, updating their `vm` lists.
pub fn relink(inv: &mut Inventory, r: &MoRef) -> Result<(), MethodFault> {
    let reg = &inv.registry;
    let vm = reg.vm(r)?;
    let dc = reg.datacenter_of(r);

    let mut datastores: Vec<MoRef> = Vec::new();
    let mut networks: Vec<MoRef> = Vec::new();
    let files = vm.config.files.vm_path_name.iter().chain(
        vm.config
            .hardware
            .device
            .iter()
            .filter_map(|d| d.backing.as_ref()?.file_name.as_ref()),
    );
    for file in files {
        if let Some((name, _)) = parse_datastore_path(file) {
            if let Some(ds) = find_datastore(reg, dc.as_ref(), name) {
                if !datastores.contains(&ds) {
                    datastores.push(ds);
                }
            }
        }
    }
    for nic in vm.config.hardware.device.iter().filter(|d| d.is_ethernet_card()) {
        let Some(backing) = &nic.backing else {
            continue;
        };
        let found = match (&backing.network, &backing.device_name) {
            (Some(net), _) if reg.contains(net) => Some(net.clone()),
            (_, Some(name)) => find_network(reg, dc.as_ref(), name),
            _ => None,
        };
        if let Some(net) = found {
            if !networks.contains(&net) {
                networks.push(net);
            }
        }
    }

    let candidates: Vec<MoRef> = reg
        .iter()
        .filter(|(_, o)| {
            matches!(
                o,
                ManagedObject::Datastore(_)
                    | ManagedObject::Network(_)
                    | ManagedObject::Portgroup(_)
            )
        })
        .map(|(c, _)| c.clone())
        .collect();
    for c in candidates {
        match inv.registry.get_mut(&c) {
            Some(ManagedObject::Datastore(d)) => {
                sync_membership(&mut d.vm, r, datastores.contains(&c))
            }
            Some(ManagedObject::Network(n)) => {
                sync_membership(&mut n.vm, r, networks.contains(&c))
            }
            Some(ManagedObject::Portgroup(pg)) => {
                sync_membership(&mut pg.network.vm, r, networks.contains(&c))
            }
            _ => {}
        }
    }
    let vm = inv.registry.vm_mut(r)?;
    vm.datastore = datastores;
    vm.network = networks;
    Ok(())
}

fn next_key(devices: &[VirtualDevice], base: i32) -> i32 {
    let mut key = base;
    while devices.iter().any(|d| d.key == key) {
        key += 1;
    }
    key
}

fn key_base(dev: &VirtualDevice) -> i32 {
    if dev.is_disk() {
        2000
    } else if dev.is_ethernet_card() {
        4000
    } else if dev.kind == "VirtualCdrom" {
        3000
    } else if dev.kind.ends_with("Controller") {
        1000
    } else {
        5000
    }
}

fn next_unit(devices: &[VirtualDevice], controller: i32) -> i32 {
    let mut unit = 0;
    while devices
        .iter()
        .any(|d| d.controller_key == Some(controller) && d.unit_number == Some(unit))
    {
        unit += 1;
        // unit 7 is reserved for the SCSI controller itself
        if unit == 7 {
            unit += 1;
        }
    }
    unit
}

/// Applies `changes` to the devices of `config`.
fn apply_devices(
    config: &mut VirtualMachineConfigInfo,
    changes: Vec<VirtualDeviceConfigSpec>,
) -> Result<(), MethodFault> {
    let datastore = home_datastore(config);
    let name = config.name.clone();
    let devices = &mut config.hardware.device;
    let mut assigned: BTreeMap<i32, i32> = BTreeMap::new();
    let invalid = || MethodFault::invalid_argument("spec.deviceChange.device");

    for change in changes {
        let mut dev = change.device;
        if let Some(ck) = dev.controller_key {
            if let Some(real) = assigned.get(&ck) {
                dev.controller_key = Some(*real);
            }
        }
        match change.operation.unwrap_or(VirtualDeviceConfigSpecOperation::Add) {
            VirtualDeviceConfigSpecOperation::Add => {
                if dev.key > 0 && devices.iter().any(|d| d.key == dev.key) {
                    return Err(invalid());
                }
                let key = next_key(devices, key_base(&dev).max(dev.key));
                if dev.key != key {
                    assigned.insert(dev.key, key);
                }
                dev.key = key;
                if let (Some(ck), None) = (dev.controller_key, dev.unit_number) {
                    dev.unit_number = Some(next_unit(devices, ck));
                }
                if dev.is_disk() {
                    let index = devices.iter().filter(|d| d.is_disk()).count();
                    let backing = dev.backing.get_or_insert_with(Default::default);
                    let generate = match backing.file_name.as_deref() {
                        None => true,
                        Some(f) => f.trim().is_empty() || f.trim_end().ends_with(']'),
                    };
                    if generate {
                        let ds = backing
                            .file_name
                            .as_deref()
                            .and_then(parse_datastore_path)
                            .map(|(ds, _)| ds.to_string())
                            .unwrap_or_else(|| datastore.clone());
                        backing.file_name = Some(disk_file(&ds, &name, index));
                    }
                    if dev.device_info.is_none() {
                        let label = format!("Hard disk {}", index + 1);
                        dev.device_info =
                            Some(Description { summary: label.clone(), label });
                    }
                }
                if dev.is_ethernet_card() {
                    let index = devices.iter().filter(|d| d.is_ethernet_card()).count();
                    if dev.mac_address.is_none() {
                        dev.mac_address = Some(random_mac());
                    }
                    if dev.connectable.is_none() {
                        dev.connectable = Some(VirtualDeviceConnectInfo {
                            start_connected: true,
                            allow_guest_control: true,
                            connected: false,
                            status: Some("untried".into()),
                        });
                    }
                    if dev.device_info.is_none() {
                        let label = format!("Network adapter {}", index + 1);
                        dev.device_info =
                            Some(Description { summary: label.clone(), label });
                    }
                }
                devices.push(dev);
            }
            VirtualDeviceConfigSpecOperation::Remove => {
                let before = devices.len();
                devices.retain(|d| d.key != dev.key);
                if devices.len() == before {
                    return Err(invalid());
                }
            }
            VirtualDeviceConfigSpecOperation::Edit => {
                let Some(existing) = devices.iter_mut().find(|d| d.key == dev.key) else {
                    return Err(invalid());
                };
                if dev.device_info.is_none() {
                    dev.device_info = existing.device_info.take();
                }
                *existing = dev;
            }
        }
    }
    Ok(())
}

/// Applies an extraConfig `SET.` key to a machine property.
fn apply_set(vm: &mut mo::VirtualMachine, path: &str, value: &Value) -> Result<(), MethodFault> {
    let text = match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    };
    match path {
        "guest.ipAddress" => vm.guest.ip_address = text,
        "guest.hostName" => vm.guest.host_name = text,
        "guest.guestState" => vm.guest.guest_state = text,
        "guest.toolsRunningStatus" => vm.guest.tools_running_status = text,
        _ => return Err(MethodFault::invalid_property(format!("{SET_PREFIX}{path}"))),
    }
    Ok(())
}

/// Merges `options` into the machine's extraConfig; an empty value
/// removes the key.
fn merge_extra_config(
    vm: &mut mo::VirtualMachine,
    options: Vec<OptionValue>,
) -> Result<(), MethodFault> {
    for opt in options {
        if let Some(path) = opt.key.strip_prefix(SET_PREFIX) {
            apply_set(vm, path, &opt.value)?;
            continue;
        }
        let empty = match &opt.value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        let config = &mut vm.config.extra_config;
        match config.iter_mut().find(|o| o.key == opt.key) {
            Some(_) if empty => config.retain(|o| o.key != opt.key),
            Some(existing) => existing.value = opt.value,
            None if empty => {}
            None => config.push(opt),
        }
    }
    Ok(())
}

fn pick_host(inv: &Inventory, pool: &MoRef) -> Result<Option<MoRef>, MethodFault> {
    let reg = &inv.registry;
    let owner = &reg.pool(pool)?.owner;
    let hosts = &reg.compute(owner)?.host;
    let usable = hosts
        .iter()
        .filter(|h| reg.host(h).is_ok_and(host::is_usable))
        .min_by_key(|h| reg.host(h).map(|x| x.vm.len()).unwrap_or(0));
    Ok(usable.or(hosts.first()).cloned())
}

/// Moves `r` onto `host`.
fn set_host(inv: &mut Inventory, r: &MoRef, host: &MoRef) -> Result<(), MethodFault> {
    inv.registry.host(host)?;
    let old = inv.registry.vm(r)?.runtime.host.clone();
    if old.as_ref() == Some(host) {
        return Ok(());
    }
    if let Some(old) = old {
        if let Ok(h) = inv.registry.host_mut(&old) {
            h.vm.retain(|v| v != r);
        }
    }
    inv.registry.host_mut(host)?.vm.push(r.clone());
    let vm = inv.registry.vm_mut(r)?;
    vm.runtime.host = Some(host.clone());
    refresh(vm);
    Ok(())
}

/// Moves `r` into resource pool `pool`, or out of any pool.
fn set_pool(inv: &mut Inventory, r: &MoRef, pool: Option<&MoRef>) -> Result<(), MethodFault> {
    if let Some(p) = pool {
        inv.registry.pool(p)?;
    }
    let old = inv.registry.vm(r)?.resource_pool.clone();
    if old.as_ref() == pool {
        return Ok(());
    }
    if let Some(old) = old {
        if let Ok(p) = inv.registry.pool_mut(&old) {
            p.vm.retain(|v| v != r);
        }
    }
    if let Some(p) = pool {
        inv.registry.pool_mut(p)?.vm.push(r.clone());
    }
    inv.registry.vm_mut(r)?.resource_pool = pool.cloned();
    Ok(())
}

/// Checks `[datastore] path` names a datastore of `dc`, returning the
/// path with its default file name filled in.
fn resolve_vm_path(
    reg: &Registry,
    dc: Option<&MoRef>,
    host: Option<&MoRef>,
    files: Option<&VirtualMachineFileInfo>,
    name: &str,
) -> Result<String, MethodFault> {
    let path = match files.and_then(|f| f.vm_path_name.clone()) {
        Some(path) => path,
        None => {
            let ds = host
                .and_then(|h| reg.host(h).ok())
                .and_then(|h| h.datastore.first())
                .and_then(|ds| reg.name(ds));
            match ds {
                Some(ds) => format!("[{ds}]"),
                None => {
                    return Err(MethodFault::InvalidDatastorePath {
                        datastore: String::new(),
                        datastore_path: String::new(),
                    })
                }
            }
        }
    };
    let invalid = |datastore: &str| MethodFault::InvalidDatastorePath {
        datastore: datastore.to_string(),
        datastore_path: path.clone(),
    };
    let Some((ds, file)) = parse_datastore_path(&path) else {
        return Err(invalid(""));
    };
    if find_datastore(reg, dc, ds).is_none() {
        return Err(invalid(ds));
    }
    Ok(match file {
        "" => format!("[{ds}] {name}/{name}.vmx"),
        file if file.ends_with(".vmx") => format!("[{ds}] {file}"),
        dir => format!("[{ds}] {}/{name}.vmx", dir.trim_end_matches('/')),
    })
}

/// Creates a virtual machine from `spec` in `folder` and `pool`.
pub fn create(
    inv: &mut Inventory,
    folder: &MoRef,
    pool: &MoRef,
    host: Option<&MoRef>,
    spec: VirtualMachineConfigSpec,
    user: &str,
) -> Result<MoRef, MethodFault> {
    create_with(inv, folder, pool, host, spec, default_devices(), user)
}

fn create_with(
    inv: &mut Inventory,
    folder: &MoRef,
    pool: &MoRef,
    host: Option<&MoRef>,
    mut spec: VirtualMachineConfigSpec,
    devices: Vec<VirtualDevice>,
    user: &str,
) -> Result<MoRef, MethodFault> {
    let name = match spec.name.take() {
        Some(name) => name,
        None => return Err(MethodFault::invalid_argument("config.name")),
    };
    entity::validate_name(&inv.registry, Some(folder), &name, None)?;
    inv.registry.pool(pool)?;
    let host = match host {
        Some(h) => {
            inv.registry.host(h)?;
            Some(h.clone())
        }
        None => pick_host(inv, pool)?,
    };
    let dc = inv.registry.datacenter_of(folder);
    let vm_path = resolve_vm_path(
        &inv.registry,
        dc.as_ref(),
        host.as_ref(),
        spec.files.as_ref(),
        &name,
    )?;

    let guest_id = spec.guest_id.take().unwrap_or_else(|| DEFAULT_GUEST.to_string());
    let memory_mb = match spec.memory_mb {
        Some(m) => i32::try_from(m)
            .ok()
            .filter(|m| *m > 0)
            .ok_or_else(|| MethodFault::invalid_argument("config.memoryMB"))?,
        None => DEFAULT_MEMORY_MB,
    };
    let num_cpu = spec.num_cpus.unwrap_or(1);
    if num_cpu < 1 {
        return Err(MethodFault::invalid_argument("config.numCPUs"));
    }
    let now = Utc::now();
    let mut files = spec.files.take().unwrap_or_default();
    files.vm_path_name = Some(vm_path);
    let config = VirtualMachineConfigInfo {
        name: name.clone(),
        uuid: spec.uuid.take().unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        instance_uuid: spec
            .instance_uuid
            .take()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        guest_full_name: guest_full_name(&guest_id),
        guest_id,
        version: spec.version.take().unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        template: false,
        annotation: spec.annotation.take().unwrap_or_default(),
        hardware: VirtualHardware {
            num_cpu,
            num_cores_per_socket: spec.num_cores_per_socket.unwrap_or(1),
            memory_mb,
            device: devices,
        },
        files,
        extra_config: Vec::new(),
        change_version: now.to_rfc3339(),
        modified: now,
        create_date: Some(now),
    };
    let runtime = VirtualMachineRuntimeInfo {
        host: host.clone(),
        connection_state: VirtualMachineConnectionState::Connected,
        power_state: VirtualMachinePowerState::PoweredOff,
        boot_time: None,
        suspend_time: None,
    };
    let mut vm = mo::VirtualMachine {
        entity: ManagedEntity::new(&name, Some(folder.clone())),
        summary: VirtualMachineSummary {
            vm: None,
            runtime: runtime.clone(),
            config: VirtualMachineConfigSummary {
                name: name.clone(),
                template: false,
                vm_path_name: String::new(),
                memory_size_mb: memory_mb,
                num_cpu,
                guest_id: String::new(),
                guest_full_name: String::new(),
                uuid: String::new(),
                instance_uuid: String::new(),
                annotation: String::new(),
            },
            guest: GuestInfo::default(),
            overall_status: ManagedEntityStatus::Green,
        },
        config,
        runtime,
        guest: GuestInfo {
            tools_status: Some("toolsNotInstalled".into()),
            tools_running_status: Some("guestToolsNotRunning".into()),
            guest_state: Some("notRunning".into()),
            ..Default::default()
        },
        resource_pool: Some(pool.clone()),
        datastore: Vec::new(),
        network: Vec::new(),
        snapshot: None,
        root_snapshot: Vec::new(),
    };
    apply_devices(&mut vm.config, std::mem::take(&mut spec.device_change))?;
    merge_extra_config(&mut vm, std::mem::take(&mut spec.extra_config))?;

    let r = inv.registry.new_ref("VirtualMachine");
    vm.summary.vm = Some(r.clone());
    refresh(&mut vm);
    inv.registry.insert(r.clone(), ManagedObject::VirtualMachine(vm));
    inv.registry.folder_mut(folder)?.child_entity.push(r.clone());
    inv.registry.pool_mut(pool)?.vm.push(r.clone());
    if let Some(h) = &host {
        inv.registry.host_mut(h)?.vm.push(r.clone());
    }
    relink(inv, &r)?;
    event::post(
        inv,
        "VmCreatedEvent",
        user,
        Some(&r),
        format!("Created virtual machine {name}"),
    );
    Ok(r)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerOp {
    On,
    Off,
    Suspend,
    Reset,
    Shutdown,
    Reboot,
    Standby,
}

/// Puts `vm` into power state `state`, updating boot time, guest info and
/// device connection state.
pub fn apply_power_state(vm: &mut mo::VirtualMachine, state: VirtualMachinePowerState) {
    let running = state == VirtualMachinePowerState::PoweredOn;
    let now = Utc::now();
    match state {
        VirtualMachinePowerState::PoweredOn => {
            if vm.runtime.power_state != VirtualMachinePowerState::Suspended
                || vm.runtime.boot_time.is_none()
            {
                vm.runtime.boot_time = Some(now);
            }
            vm.runtime.suspend_time = None;
        }
        VirtualMachinePowerState::PoweredOff => {
            vm.runtime.boot_time = None;
            vm.runtime.suspend_time = None;
        }
        VirtualMachinePowerState::Suspended => vm.runtime.suspend_time = Some(now),
    }
    vm.runtime.power_state = state;

    vm.guest.guest_id = running.then(|| vm.config.guest_id.clone());
    vm.guest.guest_state = Some(match running {
        true => "running".into(),
        false => "notRunning".into(),
    });
    vm.guest.tools_running_status = Some(match running {
        true => "guestToolsRunning".into(),
        false => "guestToolsNotRunning".into(),
    });
    if running {
        vm.guest.tools_status = Some("toolsOk".into());
    }
    for dev in &mut vm.config.hardware.device {
        if let Some(c) = &mut dev.connectable {
            c.connected = running && c.start_connected;
            c.status = Some(match c.connected {
                true => "ok".into(),
                false => "untried".into(),
            });
        }
    }
    refresh(vm);
}

/// Performs power operation `op` on `r`.
pub fn set_power(
    inv: &mut Inventory,
    r: &MoRef,
    op: PowerOp,
    target: Option<&MoRef>,
    user: &str,
) -> Outcome {
    use VirtualMachinePowerState::*;

    let vm = inv.registry.vm(r)?;
    let existing = vm.runtime.power_state;
    let bad = |requested: Option<VirtualMachinePowerState>| {
        Err(MethodFault::invalid_power_state(
            requested.map(|s| s.as_str()),
            existing.as_str(),
        ))
    };
    let (state, kind) = match op {
        PowerOp::On => {
            if vm.config.template {
                return Err(MethodFault::InvalidState);
            }
            if existing == PoweredOn {
                return bad(Some(PoweredOn));
            }
            let placed = target.cloned().or_else(|| vm.runtime.host.clone());
            if let Some(h) = &placed {
                if !host::is_usable(inv.registry.host(h)?) {
                    return Err(MethodFault::InvalidState);
                }
            }
            (PoweredOn, "VmPoweredOnEvent")
        }
        PowerOp::Off if existing == PoweredOff => return bad(Some(PoweredOff)),
        PowerOp::Off => (PoweredOff, "VmPoweredOffEvent"),
        PowerOp::Suspend if existing != PoweredOn => return bad(Some(Suspended)),
        PowerOp::Suspend => (Suspended, "VmSuspendedEvent"),
        PowerOp::Reset if existing != PoweredOn => return bad(Some(PoweredOn)),
        PowerOp::Reset => (PoweredOn, "VmResettingEvent"),
        _ if existing != PoweredOn => return bad(None),
        PowerOp::Shutdown => (PoweredOff, "VmGuestShutdownEvent"),
        PowerOp::Reboot => (PoweredOn, "VmGuestRebootEvent"),
        PowerOp::Standby => (Suspended, "VmGuestStandbyEvent"),
    };

    if let Some(h) = target {
        set_host(inv, r, h)?;
    }
    let vm = inv.registry.vm_mut(r)?;
    if matches!(op, PowerOp::Reset | PowerOp::Reboot) {
        vm.runtime.boot_time = None;
    }
    apply_power_state(vm, state);
    let name = vm.entity.name.clone();
    event::post(
        inv,
        kind,
        user,
        Some(r),
        format!("{name} power state changed to {}", state.as_str()),
    );
    Ok(None)
}

/// Applies `spec` to the configuration of `r`.
pub fn reconfigure(
    inv: &mut Inventory,
    r: &MoRef,
    mut spec: VirtualMachineConfigSpec,
    user: &str,
) -> Outcome {
    if spec.num_cpus.is_some_and(|n| n < 1) {
        return Err(MethodFault::invalid_argument("spec.numCPUs"));
    }
    if spec.num_cores_per_socket.is_some_and(|n| n < 1) {
        return Err(MethodFault::invalid_argument("spec.numCoresPerSocket"));
    }
    let memory_mb = match spec.memory_mb {
        Some(m) => Some(
            i32::try_from(m)
                .ok()
                .filter(|m| *m > 0)
                .ok_or_else(|| MethodFault::invalid_argument("spec.memoryMB"))?,
        ),
        None => None,
    };
    let rename = spec.name.take().filter(|n| inv.registry.name(r) != Some(n.as_str()));
    if let Some(name) = &rename {
        let parent = inv.registry.entity(r)?.parent.clone();
        entity::validate_name(&inv.registry, parent.as_ref(), name, Some(r))?;
    }

    // work on a copy so that a rejected change leaves the machine as is
    let mut vm = inv.registry.vm(r)?.clone();
    let c = &mut vm.config;
    if let Some(n) = spec.num_cpus {
        c.hardware.num_cpu = n;
    }
    if let Some(n) = spec.num_cores_per_socket {
        c.hardware.num_cores_per_socket = n;
    }
    if let Some(m) = memory_mb {
        c.hardware.memory_mb = m;
    }
    if let Some(a) = spec.annotation.take() {
        c.annotation = a;
    }
    if let Some(g) = spec.guest_id.take() {
        c.guest_full_name = guest_full_name(&g);
        c.guest_id = g;
    }
    if let Some(v) = spec.version.take() {
        c.version = v;
    }
    if let Some(u) = spec.uuid.take() {
        c.uuid = u;
    }
    if let Some(u) = spec.instance_uuid.take() {
        c.instance_uuid = u;
    }
    if let Some(files) = spec.files.take() {
        if files.vm_path_name.is_some() {
            c.files.vm_path_name = files.vm_path_name;
        }
        c.files.snapshot_directory = files.snapshot_directory.or(c.files.snapshot_directory.take());
        c.files.suspend_directory = files.suspend_directory.or(c.files.suspend_directory.take());
        c.files.log_directory = files.log_directory.or(c.files.log_directory.take());
    }
    apply_devices(c, std::mem::take(&mut spec.device_change))?;
    merge_extra_config(&mut vm, std::mem::take(&mut spec.extra_config))?;
    let now = Utc::now();
    vm.config.modified = now;
    vm.config.change_version = now.to_rfc3339();
    refresh(&mut vm);
    *inv.registry.vm_mut(r)? = vm;
    if let Some(name) = &rename {
        entity::rename(inv, r, name)?;
    }
    relink(inv, r)?;
    let name = inv.registry.name(r).unwrap_or_default().to_string();
    event::post(inv, "VmReconfiguredEvent", user, Some(r), format!("Reconfigured {name}"));
    Ok(None)
}

fn clone_vm(
    inv: &mut Inventory,
    src: &MoRef,
    folder: &MoRef,
    name: &str,
    spec: VirtualMachineCloneSpec,
    user: &str,
) -> Outcome {
    let source = inv.registry.vm(src)?.clone();
    if !folder::accepts(inv, folder, "VirtualMachine")? {
        return Err(MethodFault::NotSupported);
    }
    if let Some(snap) = &spec.snapshot {
        inv.registry.snapshot(snap)?;
    }
    let location = &spec.location;
    let host = location.host.clone().or_else(|| source.runtime.host.clone());
    let pool = match location.pool.clone().or_else(|| source.resource_pool.clone()) {
        Some(pool) => pool,
        None => {
            let compute = host
                .as_ref()
                .and_then(|h| inv.registry.entity(h).ok())
                .and_then(|e| e.parent.clone());
            compute
                .and_then(|c| inv.registry.compute(&c).ok())
                .and_then(|c| c.resource_pool.clone())
                .ok_or_else(|| MethodFault::invalid_argument("spec.location.pool"))?
        }
    };
    let datastore = match &location.datastore {
        Some(ds) => inv.registry.datastore(ds)?.entity.name.clone(),
        None => home_datastore(&source.config),
    };

    let mut devices = source.config.hardware.device.clone();
    let mut disks = 0;
    for dev in &mut devices {
        if dev.is_ethernet_card() {
            dev.mac_address = Some(random_mac());
        }
        if dev.is_disk() {
            let backing = dev.backing.get_or_insert_with(VirtualDeviceBackingInfo::default);
            backing.file_name = Some(disk_file(&datastore, name, disks));
            disks += 1;
        }
    }
    let c = &source.config;
    let config = VirtualMachineConfigSpec {
        name: Some(name.to_string()),
        version: Some(c.version.clone()),
        guest_id: Some(c.guest_id.clone()),
        annotation: Some(c.annotation.clone()),
        files: Some(VirtualMachineFileInfo {
            vm_path_name: Some(format!("[{datastore}]")),
            ..Default::default()
        }),
        num_cpus: Some(c.hardware.num_cpu),
        num_cores_per_socket: Some(c.hardware.num_cores_per_socket),
        memory_mb: Some(i64::from(c.hardware.memory_mb)),
        extra_config: c.extra_config.clone(),
        ..Default::default()
    };
    let host = match &location.host {
        Some(h) => Some(h.clone()),
        None => host.filter(|h| {
            inv.registry
                .pool(&pool)
                .ok()
                .and_then(|p| inv.registry.compute(&p.owner).ok())
                .is_some_and(|c| c.host.contains(h))
        }),
    };
    let clone = create_with(inv, folder, &pool, host.as_ref(), config, devices, user)?;
    let finish = |inv: &mut Inventory| -> Result<(), MethodFault> {
        if let Some(config) = spec.config {
            reconfigure(inv, &clone, config, user)?;
        }
        if spec.template {
            mark_template(inv, &clone)?;
        } else if spec.power_on {
            set_power(inv, &clone, PowerOp::On, None, user)?;
        }
        Ok(())
    };
    if let Err(fault) = finish(inv) {
        entity::purge_vm(inv, &clone);
        return Err(fault);
    }
    event::post(
        inv,
        "VmClonedEvent",
        user,
        Some(&clone),
        format!("Clone of {} completed", source.entity.name),
    );
    Ok(Some(encode(&clone)?))
}

fn relocate(
    inv: &mut Inventory,
    r: &MoRef,
    spec: VirtualMachineRelocateSpec,
    user: &str,
) -> Outcome {
    if let Some(f) = &spec.folder {
        if !folder::accepts(inv, f, "VirtualMachine")? {
            return Err(MethodFault::NotSupported);
        }
    }
    if let Some(h) = &spec.host {
        inv.registry.host(h)?;
    }
    if let Some(p) = &spec.pool {
        inv.registry.pool(p)?;
    }
    if let Some(ds) = &spec.datastore {
        let target = inv.registry.datastore(ds)?.entity.name.clone();
        let vm = inv.registry.vm_mut(r)?;
        let from = home_datastore(&vm.config);
        let moved = |path: &str| match parse_datastore_path(path) {
            Some((ds, file)) if ds == from => format!("[{target}] {file}"),
            _ => path.to_string(),
        };
        vm.config.files.vm_path_name = vm.config.files.vm_path_name.as_deref().map(moved);
        for dev in &mut vm.config.hardware.device {
            if let Some(b) = &mut dev.backing {
                b.file_name = b.file_name.as_deref().map(moved);
            }
        }
        refresh(vm);
    }
    if let Some(p) = &spec.pool {
        set_pool(inv, r, Some(p))?;
    }
    if let Some(h) = &spec.host {
        set_host(inv, r, h)?;
    }
    if let Some(f) = &spec.folder {
        let old = inv.registry.entity(r)?.parent.clone();
        if old.as_ref() != Some(f) {
            if let Some(old) = old {
                inv.registry.folder_mut(&old)?.child_entity.retain(|c| c != r);
            }
            inv.registry.folder_mut(f)?.child_entity.push(r.clone());
            inv.registry.entity_mut(r)?.parent = Some(f.clone());
        }
    }
    relink(inv, r)?;
    let name = inv.registry.name(r).unwrap_or_default().to_string();
    event::post(inv, "VmRelocatedEvent", user, Some(r), format!("Completed the relocation of {name}"));
    Ok(None)
}

fn mark_template(inv: &mut Inventory, r: &MoRef) -> Result<(), MethodFault> {
    let vm = inv.registry.vm(r)?;
    if vm.config.template {
        return Err(MethodFault::NotSupported);
    }
    if vm.runtime.power_state != VirtualMachinePowerState::PoweredOff {
        return Err(MethodFault::invalid_power_state(
            None,
            vm.runtime.power_state.as_str(),
        ));
    }
    set_pool(inv, r, None)?;
    let vm = inv.registry.vm_mut(r)?;
    vm.config.template = true;
    refresh(vm);
    Ok(())
}

fn mark_vm(inv: &mut Inventory, r: &MoRef, req: MarkAsVirtualMachineRequest) -> MethodResult {
    if !inv.registry.vm(r)?.config.template {
        return Err(MethodFault::NotSupported);
    }
    set_pool(inv, r, Some(&req.pool))?;
    if let Some(h) = &req.host {
        set_host(inv, r, h)?;
    }
    let vm = inv.registry.vm_mut(r)?;
    vm.config.template = false;
    refresh(vm);
    Ok(Value::Null)
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    let r = this.clone();
    let user = call.user();
    let power = move |op: PowerOp| {
        move |inv: &mut Inventory| set_power(inv, &r, op, None, &user)
    };
    match method {
        "PowerOnVM_Task" => {
            let req: PowerOnVmRequest = decode(args)?;
            let (r, user) = (this.clone(), call.user());
            task::run(call, this, method, move |inv| {
                set_power(inv, &r, PowerOp::On, req.host.as_ref(), &user)
            })
        }
        "PowerOffVM_Task" => task::run(call, this, method, power(PowerOp::Off)),
        "SuspendVM_Task" => task::run(call, this, method, power(PowerOp::Suspend)),
        "ResetVM_Task" => task::run(call, this, method, power(PowerOp::Reset)),
        "ShutdownGuest" | "RebootGuest" | "StandbyGuest" => {
            let op = match method {
                "ShutdownGuest" => PowerOp::Shutdown,
                "RebootGuest" => PowerOp::Reboot,
                _ => PowerOp::Standby,
            };
            power(op)(&mut *call.inv)?;
            Ok(Value::Null)
        }
        "ReconfigVM_Task" => {
            let req: ReconfigVmRequest = decode(args)?;
            let (r, user) = (this.clone(), call.user());
            task::run(call, this, method, move |inv| reconfigure(inv, &r, req.spec, &user))
        }
        "CloneVM_Task" => {
            let req: CloneVmRequest = decode(args)?;
            let (r, user) = (this.clone(), call.user());
            task::run(call, this, method, move |inv| {
                clone_vm(inv, &r, &req.folder, &req.name, req.spec, &user)
            })
        }
        "RelocateVM_Task" => {
            let req: RelocateVmRequest = decode(args)?;
            let (r, user) = (this.clone(), call.user());
            task::run(call, this, method, move |inv| relocate(inv, &r, req.spec, &user))
        }
        "MarkAsTemplate" => {
            mark_template(call.inv, this)?;
            Ok(Value::Null)
        }
        "MarkAsVirtualMachine" => {
            let req: MarkAsVirtualMachineRequest = decode(args)?;
            mark_vm(call.inv, this, req)
        }
        "UnregisterVM" => {
            let vm = call.inv.registry.vm(this)?;
            if vm.runtime.power_state == VirtualMachinePowerState::PoweredOn {
                return Err(MethodFault::invalid_power_state(None, "poweredOn"));
            }
            entity::purge_vm(call.inv, this);
            Ok(Value::Null)
        }
        "CreateSnapshot_Task" => {
            let req: CreateSnapshotRequest = decode(args)?;
            let r = this.clone();
            task::run(call, this, method, move |inv| {
                let snap = snapshot::create(inv, &r, req)?;
                Ok(Some(encode(&snap)?))
            })
        }
        "RevertToCurrentSnapshot_Task" => {
            let r = this.clone();
            task::run(call, this, method, move |inv| {
                let current = inv
                    .registry
                    .vm(&r)?
                    .snapshot
                    .as_ref()
                    .and_then(|s| s.current_snapshot.clone())
                    .ok_or(MethodFault::NotFound)?;
                snapshot::revert(inv, &current)
            })
        }
        "RemoveAllSnapshots_Task" => {
            let r = this.clone();
            task::run(call, this, method, move |inv| snapshot::remove_all(inv, &r))
        }
        _ => entity::dispatch(call, this, method, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::testing::{context, invoke_as, login, run_task};
    use serde_json::json;
    use std::sync::Arc;

    async fn first_vm(ctx: &Arc<crate::Context>) -> MoRef {
        ctx.inventory.lock().await.registry.all_of("VirtualMachine")[0].clone()
    }

    #[test]
    fn datastore_paths() {
        assert_eq!(parse_datastore_path("[LocalDS_0] vm/vm.vmx"), Some(("LocalDS_0", "vm/vm.vmx")));
        assert_eq!(parse_datastore_path("[LocalDS_0]"), Some(("LocalDS_0", "")));
        assert_eq!(parse_datastore_path("vm.vmx"), None);
    }

    #[test]
    fn device_keys_and_units() {
        let mut config = VirtualMachineConfigInfo {
            name: "vm".into(),
            uuid: String::new(),
            instance_uuid: String::new(),
            guest_id: DEFAULT_GUEST.into(),
            guest_full_name: String::new(),
            version: DEFAULT_VERSION.into(),
            template: false,
            annotation: String::new(),
            hardware: VirtualHardware { device: default_devices(), ..Default::default() },
            files: VirtualMachineFileInfo {
                vm_path_name: Some("[LocalDS_0] vm/vm.vmx".into()),
                ..Default::default()
            },
            extra_config: vec![],
            change_version: String::new(),
            modified: Utc::now(),
            create_date: None,
        };
        let add = |dev: VirtualDevice| VirtualDeviceConfigSpec {
            operation: Some(VirtualDeviceConfigSpecOperation::Add),
            file_operation: None,
            device: dev,
        };
        let changes = vec![
            add(VirtualDevice { kind: "ParaVirtualSCSIController".into(), key: -1, ..Default::default() }),
            add(VirtualDevice {
                kind: "VirtualDisk".into(),
                key: -2,
                controller_key: Some(-1),
                capacity_in_kb: Some(1024),
                ..Default::default()
            }),
            add(VirtualDevice { kind: "VirtualVmxnet3".into(), key: -3, ..Default::default() }),
        ];
        apply_devices(&mut config, changes).unwrap();

        let devices = &config.hardware.device;
        let ctrl = devices.iter().find(|d| d.kind == "ParaVirtualSCSIController").unwrap();
        assert_eq!(ctrl.key, 1000);
        let disk = devices.iter().find(|d| d.is_disk()).unwrap();
        assert_eq!(disk.key, 2000);
        assert_eq!(disk.controller_key, Some(1000));
        assert_eq!(disk.unit_number, Some(0));
        assert_eq!(
            disk.backing.as_ref().unwrap().file_name.as_deref(),
            Some("[LocalDS_0] vm/vm.vmdk")
        );
        let nic = devices.iter().find(|d| d.is_ethernet_card()).unwrap();
        assert_eq!(nic.key, 4000);
        assert!(nic.mac_address.as_deref().unwrap().starts_with("00:50:56:"));
        assert_eq!(nic.label(), Some("Network adapter 1"));

        let remove = VirtualDeviceConfigSpec {
            operation: Some(VirtualDeviceConfigSpecOperation::Remove),
            file_operation: None,
            device: VirtualDevice { kind: "VirtualDisk".into(), key: 2000, ..Default::default() },
        };
        apply_devices(&mut config, vec![remove.clone()]).unwrap();
        assert!(!config.hardware.device.iter().any(|d| d.is_disk()));
        assert_eq!(
            apply_devices(&mut config, vec![remove]).unwrap_err(),
            MethodFault::invalid_argument("spec.deviceChange.device")
        );
    }

    #[tokio::test]
    async fn power_state_transitions() {
        let ctx = context();
        let key = login(&ctx).await;
        let vm = first_vm(&ctx).await;

        let err = run_task(&ctx, &key, &vm, "PowerOnVM_Task", Value::Null).await.unwrap_err();
        assert_eq!(err, MethodFault::invalid_power_state(Some("poweredOn"), "poweredOn"));

        run_task(&ctx, &key, &vm, "SuspendVM_Task", Value::Null).await.unwrap();
        {
            let inv = ctx.inventory.lock().await;
            let v = inv.registry.vm(&vm).unwrap();
            assert_eq!(v.runtime.power_state, VirtualMachinePowerState::Suspended);
            assert_eq!(v.summary.runtime.power_state, VirtualMachinePowerState::Suspended);
            assert_eq!(inv.events.latest().unwrap().kind, "VmSuspendedEvent");
        }
        let err = run_task(&ctx, &key, &vm, "SuspendVM_Task", Value::Null).await.unwrap_err();
        assert!(matches!(err, MethodFault::InvalidPowerState { .. }));

        run_task(&ctx, &key, &vm, "PowerOffVM_Task", Value::Null).await.unwrap();
        {
            let inv = ctx.inventory.lock().await;
            let v = inv.registry.vm(&vm).unwrap();
            assert_eq!(v.runtime.boot_time, None);
            assert_eq!(v.guest.guest_state.as_deref(), Some("notRunning"));
            let connected = v
                .config
                .hardware
                .device
                .iter()
                .filter_map(|d| d.connectable.as_ref())
                .any(|c| c.connected);
            assert!(!connected);
        }
        let err = invoke_as(&ctx, Some(&key), &vm, "ShutdownGuest", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, MethodFault::InvalidPowerState { .. }));

        run_task(&ctx, &key, &vm, "PowerOnVM_Task", Value::Null).await.unwrap();
        invoke_as(&ctx, Some(&key), &vm, "ShutdownGuest", Value::Null).await.unwrap();
        let inv = ctx.inventory.lock().await;
        let v = inv.registry.vm(&vm).unwrap();
        assert_eq!(v.runtime.power_state, VirtualMachinePowerState::PoweredOff);
        assert_eq!(inv.events.latest().unwrap().kind, "VmGuestShutdownEvent");
    }

    #[tokio::test]
    async fn reconfigure_hardware_and_extra_config() {
        let ctx = context();
        let key = login(&ctx).await;
        let vm = first_vm(&ctx).await;

        run_task(
            &ctx,
            &key,
            &vm,
            "ReconfigVM_Task",
            json!({"spec": {
                "numCPUs": 4,
                "memoryMB": 2048,
                "annotation": "hello",
                "extraConfig": [
                    {"key": "guestinfo.a", "value": "1"},
                    {"key": "SET.guest.ipAddress", "value": "10.0.0.42"},
                ],
            }}),
        )
        .await
        .unwrap();
        {
            let inv = ctx.inventory.lock().await;
            let v = inv.registry.vm(&vm).unwrap();
            assert_eq!(v.config.hardware.num_cpu, 4);
            assert_eq!(v.summary.config.memory_size_mb, 2048);
            assert_eq!(v.summary.config.annotation, "hello");
            assert_eq!(v.config.extra_config, vec![OptionValue::new("guestinfo.a", "1")]);
            assert_eq!(v.guest.ip_address.as_deref(), Some("10.0.0.42"));
        }

        run_task(
            &ctx,
            &key,
            &vm,
            "ReconfigVM_Task",
            json!({"spec": {"extraConfig": [{"key": "guestinfo.a", "value": ""}]}}),
        )
        .await
        .unwrap();
        assert!(ctx.inventory.lock().await.registry.vm(&vm).unwrap().config.extra_config.is_empty());

        let err = run_task(&ctx, &key, &vm, "ReconfigVM_Task", json!({"spec": {"numCPUs": 0}}))
            .await
            .unwrap_err();
        assert_eq!(err, MethodFault::invalid_argument("spec.numCPUs"));
    }

    #[tokio::test]
    async fn create_vm_validates_datastore_path() {
        let ctx = context();
        let key = login(&ctx).await;
        let (folder, pool) = {
            let inv = ctx.inventory.lock().await;
            let dc = inv.registry.all_of("Datacenter")[0].clone();
            let folder = inv.registry.datacenter(&dc).unwrap().vm_folder.clone();
            let vm = inv.registry.all_of("VirtualMachine")[0].clone();
            let pool = inv.registry.vm(&vm).unwrap().resource_pool.clone().unwrap();
            (folder, pool)
        };

        let err = run_task(
            &ctx,
            &key,
            &folder,
            "CreateVM_Task",
            json!({"config": {"name": "bad", "files": {"vmPathName": "[nope]"}}, "pool": pool}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MethodFault::InvalidDatastorePath { ref datastore, .. } if datastore == "nope"));

        let created = run_task(
            &ctx,
            &key,
            &folder,
            "CreateVM_Task",
            json!({
                "config": {
                    "name": "fresh",
                    "guestId": "otherGuest64",
                    "deviceChange": [{
                        "operation": "add",
                        "device": {"_typeName": "VirtualE1000", "key": -1,
                                   "backing": {"deviceName": "VM Network"}}
                    }]
                },
                "pool": pool
            }),
        )
        .await
        .unwrap()
        .unwrap();
        let created: MoRef = serde_json::from_value(created).unwrap();
        let inv = ctx.inventory.lock().await;
        let v = inv.registry.vm(&created).unwrap();
        assert_eq!(v.runtime.power_state, VirtualMachinePowerState::PoweredOff);
        assert!(v.summary.config.vm_path_name.ends_with("fresh/fresh.vmx"));
        assert_eq!(v.config.guest_full_name, "Other (64-bit)");
        assert_eq!(v.network.len(), 1);
        assert!(inv.registry.network(&v.network[0]).unwrap().vm.contains(&created));
        assert!(v.runtime.host.is_some());
        assert!(inv.registry.pool(&pool).unwrap().vm.contains(&created));
    }

    #[tokio::test]
    async fn clone_and_templates() {
        let ctx = context();
        let key = login(&ctx).await;
        let vm = first_vm(&ctx).await;
        let folder = ctx.inventory.lock().await.registry.entity(&vm).unwrap().parent.clone().unwrap();
        let src_name = ctx.inventory.lock().await.registry.name(&vm).unwrap().to_string();

        let err = run_task(
            &ctx,
            &key,
            &vm,
            "CloneVM_Task",
            json!({"folder": folder, "name": src_name, "spec": {}}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MethodFault::DuplicateName { .. }));

        let clone = run_task(
            &ctx,
            &key,
            &vm,
            "CloneVM_Task",
            json!({"folder": folder, "name": "copy", "spec": {"powerOn": true}}),
        )
        .await
        .unwrap()
        .unwrap();
        let clone: MoRef = serde_json::from_value(clone).unwrap();
        {
            let inv = ctx.inventory.lock().await;
            let (a, b) = (inv.registry.vm(&vm).unwrap(), inv.registry.vm(&clone).unwrap());
            assert_ne!(a.config.uuid, b.config.uuid);
            assert_eq!(a.config.hardware.device.len(), b.config.hardware.device.len());
            assert_eq!(b.runtime.power_state, VirtualMachinePowerState::PoweredOn);
        }

        let err = invoke_as(&ctx, Some(&key), &clone, "MarkAsTemplate", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, MethodFault::InvalidPowerState { .. }));
        run_task(&ctx, &key, &clone, "PowerOffVM_Task", Value::Null).await.unwrap();
        invoke_as(&ctx, Some(&key), &clone, "MarkAsTemplate", Value::Null).await.unwrap();
        let pool = {
            let inv = ctx.inventory.lock().await;
            let b = inv.registry.vm(&clone).unwrap();
            assert!(b.config.template);
            assert!(b.resource_pool.is_none());
            inv.registry.vm(&vm).unwrap().resource_pool.clone().unwrap()
        };
        let err = run_task(&ctx, &key, &clone, "PowerOnVM_Task", Value::Null).await.unwrap_err();
        assert_eq!(err, MethodFault::InvalidState);

        invoke_as(&ctx, Some(&key), &clone, "MarkAsVirtualMachine", json!({"pool": pool}))
            .await
            .unwrap();
        let inv = ctx.inventory.lock().await;
        assert!(!inv.registry.vm(&clone).unwrap().config.template);
        assert!(inv.registry.pool(&pool).unwrap().vm.contains(&clone));
    }

    #[tokio::test]
    async fn relocate_between_hosts() {
        let ctx = context();
        let key = login(&ctx).await;
        let (vm, from, to) = {
            let inv = ctx.inventory.lock().await;
            let cluster = inv.registry.all_of("ClusterComputeResource")[0].clone();
            let hosts = inv.registry.compute(&cluster).unwrap().host.clone();
            let vm = hosts
                .iter()
                .flat_map(|h| inv.registry.host(h).unwrap().vm.clone())
                .next()
                .unwrap();
            let from = inv.registry.vm(&vm).unwrap().runtime.host.clone().unwrap();
            let to = hosts.into_iter().find(|h| h != &from).unwrap();
            (vm, from, to)
        };
        run_task(&ctx, &key, &vm, "RelocateVM_Task", json!({"spec": {"host": to}}))
            .await
            .unwrap();
        let inv = ctx.inventory.lock().await;
        assert_eq!(inv.registry.vm(&vm).unwrap().runtime.host.as_ref(), Some(&to));
        assert!(!inv.registry.host(&from).unwrap().vm.contains(&vm));
        assert!(inv.registry.host(&to).unwrap().vm.contains(&vm));
    }

    #[tokio::test]
    async fn unregister_and_destroy() {
        let ctx = context();
        let key = login(&ctx).await;
        let vms = ctx.inventory.lock().await.registry.all_of("VirtualMachine");

        let err = run_task(&ctx, &key, &vms[0], "Destroy_Task", Value::Null).await.unwrap_err();
        assert!(matches!(err, MethodFault::InvalidPowerState { .. }));

        for vm in &vms[..2] {
            run_task(&ctx, &key, vm, "PowerOffVM_Task", Value::Null).await.unwrap();
        }
        run_task(&ctx, &key, &vms[0], "Destroy_Task", Value::Null).await.unwrap();
        invoke_as(&ctx, Some(&key), &vms[1], "UnregisterVM", Value::Null).await.unwrap();

        let inv = ctx.inventory.lock().await;
        assert!(!inv.registry.contains(&vms[0]));
        assert!(!inv.registry.contains(&vms[1]));
        for ds in inv.registry.all_of("Datastore") {
            let d = inv.registry.datastore(&ds).unwrap();
            assert!(!d.vm.contains(&vms[0]) && !d.vm.contains(&vms[1]));
        }
    }

    #[tokio::test]
    async fn rejected_reconfigure_keeps_name() {
        let ctx = context();
        let key = login(&ctx).await;
        let vm = first_vm(&ctx).await;
        let before = ctx.inventory.lock().await.registry.name(&vm).unwrap().to_string();

        let err = run_task(
            &ctx,
            &key,
            &vm,
            "ReconfigVM_Task",
            json!({"spec": {
                "name": "renamed",
                "deviceChange": [{
                    "operation": "remove",
                    "device": {"_typeName": "VirtualDisk", "key": 999999}
                }],
            }}),
        )
        .await
        .unwrap_err();
        assert_eq!(err, MethodFault::invalid_argument("spec.deviceChange.device"));
        {
            let inv = ctx.inventory.lock().await;
            let v = inv.registry.vm(&vm).unwrap();
            assert_eq!(v.entity.name, before);
            assert_eq!(v.config.name, before);
        }

        run_task(&ctx, &key, &vm, "ReconfigVM_Task", json!({"spec": {"name": "renamed"}}))
            .await
            .unwrap();
        let inv = ctx.inventory.lock().await;
        let v = inv.registry.vm(&vm).unwrap();
        assert_eq!(v.entity.name, "renamed");
        assert_eq!(v.summary.config.name, "renamed");
    }

    #[tokio::test]
    async fn failed_clone_is_removed() {
        let ctx = context();
        let key = login(&ctx).await;
        let vm = first_vm(&ctx).await;
        let (folder, count) = {
            let inv = ctx.inventory.lock().await;
            let folder = inv.registry.entity(&vm).unwrap().parent.clone().unwrap();
            (folder, inv.registry.all_of("VirtualMachine").len())
        };

        let err = run_task(
            &ctx,
            &key,
            &vm,
            "CloneVM_Task",
            json!({"folder": folder, "name": "half-made", "spec": {"config": {"numCPUs": 0}}}),
        )
        .await
        .unwrap_err();
        assert_eq!(err, MethodFault::invalid_argument("spec.numCPUs"));

        let inv = ctx.inventory.lock().await;
        assert_eq!(inv.registry.find_child(&folder, "half-made"), None);
        assert_eq!(inv.registry.all_of("VirtualMachine").len(), count);
    }
}
