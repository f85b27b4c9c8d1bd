// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;
use vim_api_types::methods::{
    AddStandaloneHostRequest, CreateClusterExRequest, CreateVmRequest,
    MoveIntoFolderRequest, NameRequest,
};
use vim_api_types::vm::{
    ClusterConfigSpecEx, HostConnectSpec, VirtualMachineConfigSpec,
};
use vim_api_types::MoRef;

use super::{managed_object, ClusterComputeResource};
use crate::task::Task;
use crate::Result;

managed_object!(
    /// A `Folder`.
    Folder
);

impl Folder {
    pub async fn create_folder(&self, name: &str) -> Result<Folder> {
        let req = NameRequest { name: name.to_string() };
        let folder: MoRef = self.invoke("CreateFolder", &req).await?;
        Ok(Folder::new(self.client(), folder))
    }

    pub async fn create_datacenter(&self, name: &str) -> Result<Datacenter> {
        let req = NameRequest { name: name.to_string() };
        let dc: MoRef = self.invoke("CreateDatacenter", &req).await?;
        Ok(Datacenter::new(self.client(), dc))
    }

    pub async fn create_cluster(
        &self,
        name: &str,
        spec: ClusterConfigSpecEx,
    ) -> Result<ClusterComputeResource> {
        let req = CreateClusterExRequest { name: name.to_string(), spec };
        let cluster: MoRef = self.invoke("CreateClusterEx", &req).await?;
        Ok(ClusterComputeResource::new(self.client(), cluster))
    }

    /// Adds a standalone host. The task result is the new compute resource.
    pub async fn add_standalone_host(
        &self,
        spec: HostConnectSpec,
        add_connected: bool,
    ) -> Result<Task> {
        let req = AddStandaloneHostRequest { spec, add_connected };
        self.task("AddStandaloneHost_Task", &req).await
    }

    /// Creates a VM in `pool`. The task result is the new machine.
    pub async fn create_vm(
        &self,
        config: VirtualMachineConfigSpec,
        pool: &MoRef,
        host: Option<&MoRef>,
    ) -> Result<Task> {
        let req = CreateVmRequest { config, pool: pool.clone(), host: host.cloned() };
        self.task("CreateVM_Task", &req).await
    }

    pub async fn move_into(&self, list: &[MoRef]) -> Result<Task> {
        let req = MoveIntoFolderRequest { list: list.to_vec() };
        self.task("MoveIntoFolder_Task", &req).await
    }

    pub async fn children(&self) -> Result<Vec<MoRef>> {
        let children: Option<Vec<MoRef>> = self.property("childEntity").await?;
        Ok(children.unwrap_or_default())
    }
}

/// The folders a datacenter keeps its inventory in.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterFolders {
    pub vm_folder: MoRef,
    pub host_folder: MoRef,
    pub datastore_folder: MoRef,
    pub network_folder: MoRef,
}

managed_object!(
    /// A `Datacenter`.
    Datacenter
);

impl Datacenter {
    pub async fn folders(&self) -> Result<DatacenterFolders> {
        self.properties(&["vmFolder", "hostFolder", "datastoreFolder", "networkFolder"])
            .await
    }

    pub async fn vm_folder(&self) -> Result<Folder> {
        let folder: MoRef = self.property("vmFolder").await?;
        Ok(Folder::new(self.client(), folder))
    }

    pub async fn host_folder(&self) -> Result<Folder> {
        let folder: MoRef = self.property("hostFolder").await?;
        Ok(Folder::new(self.client(), folder))
    }
}
