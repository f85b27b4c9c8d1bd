// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual machine, host and cluster specifications.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::mo::{ClusterDasConfigInfo, ClusterDrsConfigInfo};
use crate::{MoRef, OptionValue};

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineFileInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_path_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_directory: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Description {
    pub label: String,
    pub summary: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDeviceBackingInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore: Option<MoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<MoRef>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDeviceConnectInfo {
    pub start_connected: bool,
    pub allow_guest_control: bool,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A virtual device. `kind` names the concrete device type, such as
/// `VirtualDisk` or `VirtualVmxnet3`.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDevice {
    #[serde(rename = "_typeName")]
    pub kind: String,
    #[serde(default)]
    pub key: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<Description>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_key: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_number: Option<i32>,
    #[serde(
        rename = "capacityInKB",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub capacity_in_kb: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backing: Option<VirtualDeviceBackingInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectable: Option<VirtualDeviceConnectInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

impl VirtualDevice {
    pub fn is_disk(&self) -> bool {
        self.kind == "VirtualDisk"
    }

    pub fn is_ethernet_card(&self) -> bool {
        matches!(
            self.kind.as_str(),
            "VirtualE1000"
                | "VirtualE1000e"
                | "VirtualVmxnet2"
                | "VirtualVmxnet3"
                | "VirtualPCNet32"
                | "VirtualSriovEthernetCard"
        )
    }

    pub fn label(&self) -> Option<&str> {
        self.device_info.as_ref().map(|d| d.label.as_str())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VirtualDeviceConfigSpecOperation {
    Add,
    Remove,
    Edit,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VirtualDeviceConfigSpecFileOperation {
    Create,
    Destroy,
    Replace,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDeviceConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<VirtualDeviceConfigSpecOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_operation: Option<VirtualDeviceConfigSpecFileOperation>,
    pub device: VirtualDevice,
}

/// Requested changes to a virtual machine configuration.
///
/// Every member is optional; unset members leave the configuration as is.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<VirtualMachineFileInfo>,
    #[serde(rename = "numCPUs", default, skip_serializing_if = "Option::is_none")]
    pub num_cpus: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_cores_per_socket: Option<i32>,
    #[serde(rename = "memoryMB", default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_change: Vec<VirtualDeviceConfigSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_config: Vec<OptionValue>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineRelocateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<MoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore: Option<MoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<MoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<MoRef>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineCloneSpec {
    #[serde(default)]
    pub location: VirtualMachineRelocateSpec,
    #[serde(default)]
    pub template: bool,
    #[serde(default)]
    pub power_on: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<VirtualMachineConfigSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<MoRef>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConnectSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_thumbprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigSpecEx {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drs_config: Option<ClusterDrsConfigInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub das_config: Option<ClusterDasConfigInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_spec_member_names() {
        let spec = VirtualMachineConfigSpec {
            num_cpus: Some(4),
            memory_mb: Some(2048),
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json, serde_json::json!({"numCPUs": 4, "memoryMB": 2048}));
    }

    #[test]
    fn device_kind_is_type_name() {
        let dev: VirtualDevice = serde_json::from_value(serde_json::json!({
            "_typeName": "VirtualVmxnet3",
            "key": 4000,
            "macAddress": "00:50:56:aa:bb:cc"
        }))
        .unwrap();
        assert!(dev.is_ethernet_card());
        assert!(!dev.is_disk());
        assert_eq!(dev.key, 4000);
    }
}
