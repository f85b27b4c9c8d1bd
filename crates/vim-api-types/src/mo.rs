// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Properties of the managed object types.
//!
//! These are the property views reported by the property collector. The
//! simulator keeps its inventory in these structs and the client decodes
//! retrieved properties into them.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::task::TaskInfo;
use crate::vm::{VirtualDevice, VirtualMachineFileInfo};
use crate::{AboutInfo, MoRef, OptionValue};

/// Health rollup of an entity.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ManagedEntityStatus {
    Gray,
    #[default]
    Green,
    Yellow,
    Red,
}

/// Properties common to every inventory entity.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedEntity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<MoRef>,
    #[serde(default)]
    pub overall_status: ManagedEntityStatus,
    #[serde(default)]
    pub config_status: ManagedEntityStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_method: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_task: Vec<MoRef>,
}

impl ManagedEntity {
    pub fn new(name: impl Into<String>, parent: Option<MoRef>) -> Self {
        Self { name: name.into(), parent, ..Default::default() }
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    #[serde(flatten)]
    pub entity: ManagedEntity,
    #[serde(default)]
    pub child_type: Vec<String>,
    #[serde(default)]
    pub child_entity: Vec<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Datacenter {
    #[serde(flatten)]
    pub entity: ManagedEntity,
    pub vm_folder: MoRef,
    pub host_folder: MoRef,
    pub datastore_folder: MoRef,
    pub network_folder: MoRef,
    #[serde(default)]
    pub datastore: Vec<MoRef>,
    #[serde(default)]
    pub network: Vec<MoRef>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResourceSummary {
    pub total_cpu: i32,
    pub total_memory: i64,
    pub num_cpu_cores: i16,
    pub num_cpu_threads: i16,
    pub effective_cpu: i32,
    pub effective_memory: i64,
    pub num_hosts: i32,
    pub num_effective_hosts: i32,
    pub overall_status: ManagedEntityStatus,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDrsConfigInfo {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub default_vm_behavior: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDasConfigInfo {
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigInfoEx {
    #[serde(default)]
    pub drs_config: ClusterDrsConfigInfo,
    #[serde(default)]
    pub das_config: ClusterDasConfigInfo,
}

/// Properties of a `ComputeResource` or `ClusterComputeResource`.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResource {
    #[serde(flatten)]
    pub entity: ManagedEntity,
    #[serde(default)]
    pub host: Vec<MoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool: Option<MoRef>,
    #[serde(default)]
    pub datastore: Vec<MoRef>,
    #[serde(default)]
    pub network: Vec<MoRef>,
    #[serde(default)]
    pub summary: ComputeResourceSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_ex: Option<ClusterConfigInfoEx>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HostSystemConnectionState {
    Connected,
    NotResponding,
    Disconnected,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HostSystemPowerState {
    PoweredOn,
    PoweredOff,
    StandBy,
    Unknown,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRuntimeInfo {
    pub connection_state: HostSystemConnectionState,
    pub power_state: HostSystemPowerState,
    pub in_maintenance_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostHardwareSummary {
    pub vendor: String,
    pub model: String,
    pub uuid: String,
    pub memory_size: i64,
    pub cpu_model: String,
    pub cpu_mhz: i32,
    pub num_cpu_pkgs: i16,
    pub num_cpu_cores: i16,
    pub num_cpu_threads: i16,
    pub num_nics: i32,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfigSummary {
    pub name: String,
    pub port: i32,
    pub product: AboutInfo,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostListSummary {
    pub hardware: HostHardwareSummary,
    pub runtime: HostRuntimeInfo,
    pub config: HostConfigSummary,
    pub overall_status: ManagedEntityStatus,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSystem {
    #[serde(flatten)]
    pub entity: ManagedEntity,
    pub runtime: HostRuntimeInfo,
    pub summary: HostListSummary,
    #[serde(default)]
    pub vm: Vec<MoRef>,
    #[serde(default)]
    pub datastore: Vec<MoRef>,
    #[serde(default)]
    pub network: Vec<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharesInfo {
    pub shares: i32,
    pub level: String,
}

impl Default for SharesInfo {
    fn default() -> Self {
        Self { shares: 4000, level: "normal".to_string() }
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAllocationInfo {
    #[serde(default)]
    pub reservation: Option<i64>,
    #[serde(default)]
    pub expandable_reservation: Option<bool>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub shares: Option<SharesInfo>,
}

impl Default for ResourceAllocationInfo {
    fn default() -> Self {
        Self {
            reservation: Some(0),
            expandable_reservation: Some(true),
            limit: Some(-1),
            shares: Some(SharesInfo::default()),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfigSpec {
    #[serde(default)]
    pub cpu_allocation: ResourceAllocationInfo,
    #[serde(default)]
    pub memory_allocation: ResourceAllocationInfo,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePool {
    #[serde(flatten)]
    pub entity: ManagedEntity,
    pub owner: MoRef,
    #[serde(default)]
    pub resource_pool: Vec<MoRef>,
    #[serde(default)]
    pub vm: Vec<MoRef>,
    #[serde(default)]
    pub config: ResourceConfigSpec,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VirtualMachinePowerState {
    PoweredOff,
    PoweredOn,
    Suspended,
}

impl VirtualMachinePowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VirtualMachinePowerState::PoweredOff => "poweredOff",
            VirtualMachinePowerState::PoweredOn => "poweredOn",
            VirtualMachinePowerState::Suspended => "suspended",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VirtualMachineConnectionState {
    Connected,
    Disconnected,
    Orphaned,
    Inaccessible,
    Invalid,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHardware {
    #[serde(rename = "numCPU")]
    pub num_cpu: i32,
    pub num_cores_per_socket: i32,
    #[serde(rename = "memoryMB")]
    pub memory_mb: i32,
    #[serde(default)]
    pub device: Vec<VirtualDevice>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineConfigInfo {
    pub name: String,
    pub uuid: String,
    pub instance_uuid: String,
    pub guest_id: String,
    pub guest_full_name: String,
    pub version: String,
    pub template: bool,
    #[serde(default)]
    pub annotation: String,
    pub hardware: VirtualHardware,
    pub files: VirtualMachineFileInfo,
    #[serde(default)]
    pub extra_config: Vec<OptionValue>,
    pub change_version: String,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineRuntimeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<MoRef>,
    pub connection_state: VirtualMachineConnectionState,
    pub power_state: VirtualMachinePowerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_running_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineConfigSummary {
    pub name: String,
    pub template: bool,
    pub vm_path_name: String,
    #[serde(rename = "memorySizeMB")]
    pub memory_size_mb: i32,
    pub num_cpu: i32,
    pub guest_id: String,
    pub guest_full_name: String,
    pub uuid: String,
    pub instance_uuid: String,
    #[serde(default)]
    pub annotation: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm: Option<MoRef>,
    pub runtime: VirtualMachineRuntimeInfo,
    pub config: VirtualMachineConfigSummary,
    #[serde(default)]
    pub guest: GuestInfo,
    pub overall_status: ManagedEntityStatus,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshotTree {
    pub snapshot: MoRef,
    pub vm: MoRef,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub id: i32,
    pub create_time: DateTime<Utc>,
    pub state: VirtualMachinePowerState,
    pub quiesced: bool,
    #[serde(default)]
    pub child_snapshot_list: Vec<VirtualMachineSnapshotTree>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshotInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_snapshot: Option<MoRef>,
    #[serde(default)]
    pub root_snapshot_list: Vec<VirtualMachineSnapshotTree>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    #[serde(flatten)]
    pub entity: ManagedEntity,
    pub config: VirtualMachineConfigInfo,
    pub runtime: VirtualMachineRuntimeInfo,
    pub summary: VirtualMachineSummary,
    #[serde(default)]
    pub guest: GuestInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool: Option<MoRef>,
    #[serde(default)]
    pub datastore: Vec<MoRef>,
    #[serde(default)]
    pub network: Vec<MoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<VirtualMachineSnapshotInfo>,
    #[serde(default)]
    pub root_snapshot: Vec<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshot {
    pub config: VirtualMachineConfigInfo,
    pub vm: MoRef,
    #[serde(default)]
    pub child_snapshot: Vec<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore: Option<MoRef>,
    pub name: String,
    pub url: String,
    pub capacity: i64,
    pub free_space: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub accessible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_mode: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreInfo {
    pub name: String,
    pub url: String,
    pub free_space: i64,
    pub max_file_size: i64,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMountInfo {
    pub path: String,
    pub access_mode: String,
    pub mounted: bool,
    pub accessible: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreHostMount {
    pub key: MoRef,
    pub mount_info: HostMountInfo,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Datastore {
    #[serde(flatten)]
    pub entity: ManagedEntity,
    pub summary: DatastoreSummary,
    pub info: DatastoreInfo,
    #[serde(default)]
    pub host: Vec<DatastoreHostMount>,
    #[serde(default)]
    pub vm: Vec<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<MoRef>,
    pub name: String,
    pub accessible: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(flatten)]
    pub entity: ManagedEntity,
    pub summary: NetworkSummary,
    #[serde(default)]
    pub host: Vec<MoRef>,
    #[serde(default)]
    pub vm: Vec<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DVPortgroupConfigInfo {
    pub key: String,
    pub name: String,
    pub num_ports: i32,
    pub distributed_virtual_switch: MoRef,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedVirtualPortgroup {
    #[serde(flatten)]
    pub network: Network,
    pub key: String,
    pub config: DVPortgroupConfigInfo,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DVSSummary {
    pub name: String,
    pub uuid: String,
    pub num_ports: i32,
    #[serde(default)]
    pub host_member: Vec<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedVirtualSwitch {
    #[serde(flatten)]
    pub entity: ManagedEntity,
    pub uuid: String,
    pub summary: DVSSummary,
    #[serde(default)]
    pub portgroup: Vec<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub info: TaskInfo,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerView {
    pub container: MoRef,
    #[serde(rename = "type", default)]
    pub kind: Vec<String>,
    pub recursive: bool,
    #[serde(default)]
    pub view: Vec<MoRef>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListView {
    #[serde(default)]
    pub view: Vec<MoRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_properties_are_flattened() {
        let folder = Folder {
            entity: ManagedEntity::new("vm", Some(MoRef::new("Datacenter", "datacenter-2"))),
            child_type: vec!["Folder".into(), "VirtualMachine".into()],
            child_entity: vec![],
        };
        let json = serde_json::to_value(&folder).unwrap();
        assert_eq!(json["name"], "vm");
        assert_eq!(json["parent"]["value"], "datacenter-2");
        assert_eq!(json["overallStatus"], "green");
        assert_eq!(json["childType"][1], "VirtualMachine");
        assert!(json.get("disabledMethod").is_none());
    }

    #[test]
    fn hardware_member_names() {
        let hw = VirtualHardware {
            num_cpu: 2,
            num_cores_per_socket: 1,
            memory_mb: 1024,
            device: vec![],
        };
        let json = serde_json::to_value(&hw).unwrap();
        assert_eq!(json["numCPU"], 2);
        assert_eq!(json["memoryMB"], 1024);
    }
}
