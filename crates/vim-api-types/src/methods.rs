// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parameters of VIM methods.
//!
//! Each struct is the JSON body posted to
//! `/sdk/vim25/{release}/{type}/{id}/{method}`; the `_this` argument travels
//! in the path.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventFilterSpec};
use crate::mo::ResourceConfigSpec;
use crate::property::{PropertyFilterSpec, RetrieveOptions, WaitOptions};
use crate::session::SessionManagerServiceRequestSpec;
use crate::task::TaskInfoState;
use crate::vm::{
    ClusterConfigSpecEx, HostConnectSpec, VirtualMachineCloneSpec,
    VirtualMachineConfigSpec, VirtualMachineRelocateSpec,
};
use crate::{LocalizableMessage, LocalizedMethodFault, MoRef, OptionValue};

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub user_name: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct SessionIsActiveRequest {
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateSessionRequest {
    pub session_id: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneSessionRequest {
    pub clone_ticket: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireGenericServiceTicketRequest {
    pub spec: SessionManagerServiceRequestSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievePropertiesRequest {
    pub spec_set: Vec<PropertyFilterSpec>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievePropertiesExRequest {
    pub spec_set: Vec<PropertyFilterSpec>,
    #[serde(default)]
    pub options: RetrieveOptions,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFilterRequest {
    pub spec: PropertyFilterSpec,
    #[serde(default)]
    pub partial_updates: bool,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForUpdatesExRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<WaitOptions>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContainerViewRequest {
    pub container: MoRef,
    #[serde(rename = "type", default)]
    pub kind: Vec<String>,
    pub recursive: bool,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListViewRequest {
    #[serde(default)]
    pub obj: Vec<MoRef>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyListViewRequest {
    #[serde(default)]
    pub add: Vec<MoRef>,
    #[serde(default)]
    pub remove: Vec<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindByInventoryPathRequest {
    pub inventory_path: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindChildRequest {
    pub entity: MoRef,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindByUuidRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<MoRef>,
    pub uuid: String,
    pub vm_search: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_uuid: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindByDnsNameRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<MoRef>,
    pub dns_name: String,
    pub vm_search: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindByIpRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<MoRef>,
    pub ip: String,
    pub vm_search: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub obj: MoRef,
    pub task_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<String>,
    #[serde(default)]
    pub cancelable: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTaskStateRequest {
    pub state: TaskInfoState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<LocalizedMethodFault>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTaskDescriptionRequest {
    pub description: LocalizableMessage,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgressRequest {
    pub percent_done: i32,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameRequest {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub new_name: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterExRequest {
    pub name: String,
    #[serde(default)]
    pub spec: ClusterConfigSpecEx,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStandaloneHostRequest {
    pub spec: HostConnectSpec,
    #[serde(default = "default_true")]
    pub add_connected: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddHostRequest {
    pub spec: HostConnectSpec,
    #[serde(default = "default_true")]
    pub as_connected: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconfigureComputeResourceRequest {
    pub spec: ClusterConfigSpecEx,
    #[serde(default)]
    pub modify: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmRequest {
    pub config: VirtualMachineConfigSpec,
    pub pool: MoRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveIntoFolderRequest {
    pub list: Vec<MoRef>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterMaintenanceModeRequest {
    #[serde(default)]
    pub timeout: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evacuate_powered_off_vms: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourcePoolRequest {
    pub name: String,
    #[serde(default)]
    pub spec: ResourceConfigSpec,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResourcePoolConfigRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ResourceConfigSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerOnVmRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconfigVmRequest {
    pub spec: VirtualMachineConfigSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneVmRequest {
    pub folder: MoRef,
    pub name: String,
    pub spec: VirtualMachineCloneSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelocateVmRequest {
    pub spec: VirtualMachineRelocateSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsVirtualMachineRequest {
    pub pool: MoRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<MoRef>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub memory: bool,
    #[serde(default)]
    pub quiesce: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveSnapshotRequest {
    pub remove_children: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidate: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameSnapshotRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEventsRequest {
    pub filter: EventFilterSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEventRequest {
    pub event_to_post: Event,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptionsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOptionsRequest {
    pub changed_value: Vec<OptionValue>,
}

fn default_true() -> bool {
    true
}
