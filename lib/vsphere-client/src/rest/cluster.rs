// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster modules: named groups of VMs within a cluster.

use vim_api_types::vapi::cluster::{
    CreateModule, CreateModuleSpec, ModuleMembers, ModuleMembersResult,
    ModuleSummary, ModuleSummaryList,
};
use vim_api_types::MoRef;

use super::{not_found, Client};
use crate::{segment, Result};

const MODULES: &str = "/api/vcenter/cluster/modules";

#[derive(Clone)]
pub struct Manager {
    client: Client,
}

impl Manager {
    pub fn new(client: &Client) -> Self {
        Manager { client: client.clone() }
    }

    pub async fn list(&self) -> Result<Vec<ModuleSummary>> {
        let list: ModuleSummaryList = self.client.get(MODULES, &[]).await?;
        Ok(list.summaries)
    }

    /// Creates a module in `cluster` and returns its id.
    pub async fn create(&self, cluster: &MoRef) -> Result<String> {
        let spec = CreateModuleSpec { cluster: cluster.value.clone() };
        self.client.post(MODULES, None, &CreateModule { spec }).await
    }

    pub async fn delete(&self, module: &str) -> Result<()> {
        self.client
            .delete(&format!("{MODULES}/{}", segment(module)))
            .await
            .map_err(not_found("cluster module", module))
    }

    pub async fn members(&self, module: &str) -> Result<Vec<MoRef>> {
        let members: ModuleMembers = self
            .client
            .get(&format!("{MODULES}/{}/vm", segment(module)), &[])
            .await
            .map_err(not_found("cluster module", module))?;
        Ok(members.vms.into_iter().map(|vm| MoRef::new("VirtualMachine", vm)).collect())
    }

    /// Adds `vms` to the module. Returns false if any was already a member.
    pub async fn add_members(&self, module: &str, vms: &[MoRef]) -> Result<bool> {
        self.update_members(module, "add", vms).await
    }

    /// Removes `vms` from the module. Returns false if any was not a member.
    pub async fn remove_members(&self, module: &str, vms: &[MoRef]) -> Result<bool> {
        self.update_members(module, "remove", vms).await
    }

    async fn update_members(&self, module: &str, action: &str, vms: &[MoRef]) -> Result<bool> {
        let body = ModuleMembers { vms: vms.iter().map(|vm| vm.value.clone()).collect() };
        let result: ModuleMembersResult = self
            .client
            .post(&format!("{MODULES}/{}/vm", segment(module)), Some(action), &body)
            .await
            .map_err(not_found("cluster module", module))?;
        Ok(result.success)
    }
}
