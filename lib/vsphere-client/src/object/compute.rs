// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde_json::json;
use vim_api_types::methods::{
    AddHostRequest, CreateResourcePoolRequest, EnterMaintenanceModeRequest,
    ReconfigureComputeResourceRequest, UpdateResourcePoolConfigRequest,
};
use vim_api_types::mo::{
    DatastoreSummary, HostRuntimeInfo, ResourceConfigSpec,
};
use vim_api_types::vm::{ClusterConfigSpecEx, HostConnectSpec};
use vim_api_types::MoRef;

use super::managed_object;
use crate::task::Task;
use crate::Result;

managed_object!(
    /// A `HostSystem`.
    HostSystem
);

impl HostSystem {
    /// Enters maintenance mode; every VM on the host must be powered off.
    pub async fn enter_maintenance_mode(&self, timeout: i32) -> Result<Task> {
        let req = EnterMaintenanceModeRequest { timeout, evacuate_powered_off_vms: None };
        self.task("EnterMaintenanceMode_Task", &req).await
    }

    pub async fn exit_maintenance_mode(&self, timeout: i32) -> Result<Task> {
        self.task("ExitMaintenanceMode_Task", &json!({ "timeout": timeout })).await
    }

    pub async fn disconnect(&self) -> Result<Task> {
        self.task("DisconnectHost_Task", &json!({})).await
    }

    pub async fn reconnect(&self) -> Result<Task> {
        self.task("ReconnectHost_Task", &json!({})).await
    }

    pub async fn runtime(&self) -> Result<HostRuntimeInfo> {
        self.property("runtime").await
    }

    pub async fn vms(&self) -> Result<Vec<MoRef>> {
        let vms: Option<Vec<MoRef>> = self.property("vm").await?;
        Ok(vms.unwrap_or_default())
    }
}

managed_object!(
    /// A `ResourcePool`.
    ResourcePool
);

impl ResourcePool {
    pub async fn create(&self, name: &str, spec: ResourceConfigSpec) -> Result<ResourcePool> {
        let req = CreateResourcePoolRequest { name: name.to_string(), spec };
        let pool: MoRef = self.invoke("CreateResourcePool", &req).await?;
        Ok(ResourcePool::new(self.client(), pool))
    }

    pub async fn update_config(
        &self,
        name: Option<&str>,
        config: Option<ResourceConfigSpec>,
    ) -> Result<()> {
        let req = UpdateResourcePoolConfigRequest { name: name.map(str::to_string), config };
        self.invoke("UpdateConfig", &req).await
    }

    pub async fn config(&self) -> Result<ResourceConfigSpec> {
        self.property("config").await
    }

    /// Child pools.
    pub async fn pools(&self) -> Result<Vec<MoRef>> {
        let pools: Option<Vec<MoRef>> = self.property("resourcePool").await?;
        Ok(pools.unwrap_or_default())
    }
}

managed_object!(
    /// A `ComputeResource` or `ClusterComputeResource`.
    ClusterComputeResource
);

impl ClusterComputeResource {
    /// Adds a host to the cluster. The task result is the new host.
    pub async fn add_host(&self, spec: HostConnectSpec, as_connected: bool) -> Result<Task> {
        let req = AddHostRequest { spec, as_connected };
        self.task("AddHost_Task", &req).await
    }

    pub async fn reconfigure(&self, spec: ClusterConfigSpecEx, modify: bool) -> Result<Task> {
        let req = ReconfigureComputeResourceRequest { spec, modify };
        self.task("ReconfigureComputeResource_Task", &req).await
    }

    pub async fn hosts(&self) -> Result<Vec<HostSystem>> {
        let hosts: Option<Vec<MoRef>> = self.property("host").await?;
        Ok(hosts
            .unwrap_or_default()
            .into_iter()
            .map(|h| HostSystem::new(self.client(), h))
            .collect())
    }

    /// The root resource pool.
    pub async fn resource_pool(&self) -> Result<ResourcePool> {
        let pool: MoRef = self.property("resourcePool").await?;
        Ok(ResourcePool::new(self.client(), pool))
    }
}

managed_object!(
    /// A `Datastore`.
    Datastore
);

impl Datastore {
    pub async fn summary(&self) -> Result<DatastoreSummary> {
        self.property("summary").await
    }

    /// The datastore path of `file`, as in `[datastore1] vm/vm.vmx`.
    pub async fn path(&self, file: &str) -> Result<String> {
        Ok(datastore_path(&self.name().await?, file))
    }
}

pub(crate) fn datastore_path(datastore: &str, file: &str) -> String {
    match file.trim_start_matches('/') {
        "" => format!("[{datastore}]"),
        file => format!("[{datastore}] {file}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datastore_paths() {
        assert_eq!(datastore_path("LocalDS_0", "vm/vm.vmx"), "[LocalDS_0] vm/vm.vmx");
        assert_eq!(datastore_path("LocalDS_0", "/vm.vmdk"), "[LocalDS_0] vm.vmdk");
        assert_eq!(datastore_path("LocalDS_0", ""), "[LocalDS_0]");
    }
}
