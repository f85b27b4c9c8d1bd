// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde_json::json;
use vim_api_types::methods::{
    CloneVmRequest, CreateSnapshotRequest, MarkAsVirtualMachineRequest,
    PowerOnVmRequest, ReconfigVmRequest, RelocateVmRequest,
    RemoveSnapshotRequest, RenameSnapshotRequest,
};
use vim_api_types::mo::{
    VirtualMachinePowerState, VirtualMachineSnapshotInfo,
    VirtualMachineSnapshotTree,
};
use vim_api_types::vm::{
    VirtualDevice, VirtualMachineCloneSpec, VirtualMachineConfigSpec,
    VirtualMachineRelocateSpec,
};
use vim_api_types::MoRef;

use super::managed_object;
use crate::task::Task;
use crate::{property, Error, Result};

managed_object!(
    /// A `VirtualMachine`.
    VirtualMachine
);

impl VirtualMachine {
    pub async fn power_on(&self) -> Result<Task> {
        self.task("PowerOnVM_Task", &PowerOnVmRequest::default()).await
    }

    /// Powers on, placing the machine on `host`.
    pub async fn power_on_at(&self, host: &MoRef) -> Result<Task> {
        let req = PowerOnVmRequest { host: Some(host.clone()) };
        self.task("PowerOnVM_Task", &req).await
    }

    pub async fn power_off(&self) -> Result<Task> {
        self.task("PowerOffVM_Task", &json!({})).await
    }

    pub async fn suspend(&self) -> Result<Task> {
        self.task("SuspendVM_Task", &json!({})).await
    }

    pub async fn reset(&self) -> Result<Task> {
        self.task("ResetVM_Task", &json!({})).await
    }

    pub async fn shutdown_guest(&self) -> Result<()> {
        self.client().call(self.reference(), "ShutdownGuest").await
    }

    pub async fn reboot_guest(&self) -> Result<()> {
        self.client().call(self.reference(), "RebootGuest").await
    }

    pub async fn standby_guest(&self) -> Result<()> {
        self.client().call(self.reference(), "StandbyGuest").await
    }

    pub async fn power_state(&self) -> Result<VirtualMachinePowerState> {
        self.property("runtime.powerState").await
    }

    /// Waits until the machine reaches `state`.
    pub async fn wait_for_power_state(&self, state: VirtualMachinePowerState) -> Result<()> {
        let collector = property::Collector::new(self.client());
        property::wait(&collector, self.reference(), &["runtime.powerState"], |changes| {
            changes.iter().any(|c| {
                c.val
                    .as_ref()
                    .and_then(|v| serde_json::from_value::<VirtualMachinePowerState>(v.clone()).ok())
                    == Some(state)
            })
        })
        .await
    }

    pub async fn reconfigure(&self, spec: VirtualMachineConfigSpec) -> Result<Task> {
        self.task("ReconfigVM_Task", &ReconfigVmRequest { spec }).await
    }

    /// Clones the machine into `folder` as `name`. The task result is the
    /// new machine.
    pub async fn clone_vm(
        &self,
        folder: &MoRef,
        name: &str,
        spec: VirtualMachineCloneSpec,
    ) -> Result<Task> {
        let req = CloneVmRequest { folder: folder.clone(), name: name.to_string(), spec };
        self.task("CloneVM_Task", &req).await
    }

    pub async fn relocate(&self, spec: VirtualMachineRelocateSpec) -> Result<Task> {
        self.task("RelocateVM_Task", &RelocateVmRequest { spec }).await
    }

    pub async fn mark_as_template(&self) -> Result<()> {
        self.client().call(self.reference(), "MarkAsTemplate").await
    }

    pub async fn mark_as_virtual_machine(&self, pool: &MoRef, host: Option<&MoRef>) -> Result<()> {
        let req = MarkAsVirtualMachineRequest { pool: pool.clone(), host: host.cloned() };
        self.invoke("MarkAsVirtualMachine", &req).await
    }

    /// Removes the machine from the inventory, keeping its files.
    pub async fn unregister(&self) -> Result<()> {
        self.client().call(self.reference(), "UnregisterVM").await
    }

    /// The host the machine is placed on.
    pub async fn host(&self) -> Result<Option<MoRef>> {
        self.property("runtime.host").await
    }

    pub async fn uuid(&self) -> Result<String> {
        self.property("config.uuid").await
    }

    pub async fn is_template(&self) -> Result<bool> {
        self.property("config.template").await
    }

    pub async fn devices(&self) -> Result<Vec<VirtualDevice>> {
        let devices: Option<Vec<VirtualDevice>> =
            self.property("config.hardware.device").await?;
        Ok(devices.unwrap_or_default())
    }

    /// Snapshots the machine. The task result is the new snapshot.
    pub async fn create_snapshot(
        &self,
        name: &str,
        description: Option<&str>,
        memory: bool,
        quiesce: bool,
    ) -> Result<Task> {
        let req = CreateSnapshotRequest {
            name: name.to_string(),
            description: description.map(str::to_string),
            memory,
            quiesce,
        };
        self.task("CreateSnapshot_Task", &req).await
    }

    pub async fn revert_to_current_snapshot(&self) -> Result<Task> {
        self.task("RevertToCurrentSnapshot_Task", &json!({})).await
    }

    pub async fn remove_all_snapshots(&self) -> Result<Task> {
        self.task("RemoveAllSnapshots_Task", &json!({})).await
    }

    pub async fn snapshot_info(&self) -> Result<Option<VirtualMachineSnapshotInfo>> {
        self.property("snapshot").await
    }

    pub async fn current_snapshot(&self) -> Result<Option<VirtualMachineSnapshot>> {
        let current = self
            .snapshot_info()
            .await?
            .and_then(|info| info.current_snapshot);
        Ok(current.map(|s| VirtualMachineSnapshot::new(self.client(), s)))
    }

    /// Finds a snapshot by name, or by a `/`-separated path of names from a
    /// root snapshot. A name matching several snapshots is an error.
    pub async fn find_snapshot(&self, name: &str) -> Result<VirtualMachineSnapshot> {
        let info = self.snapshot_info().await?.unwrap_or(VirtualMachineSnapshotInfo {
            current_snapshot: None,
            root_snapshot_list: Vec::new(),
        });
        let found = match_snapshot(&info.root_snapshot_list, name);
        match found.as_slice() {
            [] => Err(Error::NotFound { kind: "snapshot", path: name.to_string() }),
            [one] => Ok(VirtualMachineSnapshot::new(self.client(), (*one).clone())),
            _ => Err(Error::Multiple { kind: "snapshot", path: name.to_string() }),
        }
    }
}

/// Snapshots in `trees` matching `name`, either as a plain name anywhere in
/// the trees or as a full path.
fn match_snapshot<'a>(trees: &'a [VirtualMachineSnapshotTree], name: &str) -> Vec<&'a MoRef> {
    fn walk<'a>(
        trees: &'a [VirtualMachineSnapshotTree],
        prefix: &str,
        name: &str,
        out: &mut Vec<&'a MoRef>,
    ) {
        for tree in trees {
            let path = match prefix {
                "" => tree.name.clone(),
                prefix => format!("{prefix}/{}", tree.name),
            };
            if tree.name == name || path == name {
                out.push(&tree.snapshot);
            }
            walk(&tree.child_snapshot_list, &path, name, out);
        }
    }
    let mut out = Vec::new();
    walk(trees, "", name, &mut out);
    out.dedup();
    out
}

managed_object!(
    /// A `VirtualMachineSnapshot`.
    VirtualMachineSnapshot
);

impl VirtualMachineSnapshot {
    pub async fn remove(&self, remove_children: bool) -> Result<Task> {
        let req = RemoveSnapshotRequest { remove_children, consolidate: None };
        self.task("RemoveSnapshot_Task", &req).await
    }

    pub async fn revert(&self) -> Result<Task> {
        self.task("RevertToSnapshot_Task", &json!({})).await
    }

    pub async fn rename_snapshot(&self, name: Option<&str>, description: Option<&str>) -> Result<()> {
        let req = RenameSnapshotRequest {
            name: name.map(str::to_string),
            description: description.map(str::to_string),
        };
        self.invoke("RenameSnapshot", &req).await
    }

    pub async fn vm(&self) -> Result<MoRef> {
        self.property("vm").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(id: i32, name: &str, children: Vec<VirtualMachineSnapshotTree>) -> VirtualMachineSnapshotTree {
        serde_json::from_value(json!({
            "snapshot": {"type": "VirtualMachineSnapshot", "value": format!("snapshot-{id}")},
            "vm": {"type": "VirtualMachine", "value": "vm-1"},
            "name": name,
            "id": id,
            "createTime": "2024-01-01T00:00:00Z",
            "state": "poweredOff",
            "quiesced": false,
            "childSnapshotList": serde_json::to_value(children).unwrap(),
        }))
        .unwrap()
    }

    #[test]
    fn snapshots_match_by_name_or_path() {
        let trees = vec![tree(
            1,
            "root",
            vec![tree(2, "a", vec![tree(4, "x", vec![])]), tree(3, "b", vec![tree(5, "x", vec![])])],
        )];

        let found = match_snapshot(&trees, "a");
        assert_eq!(found, vec![&MoRef::new("VirtualMachineSnapshot", "snapshot-2")]);

        assert_eq!(match_snapshot(&trees, "x").len(), 2);

        let found = match_snapshot(&trees, "root/b/x");
        assert_eq!(found, vec![&MoRef::new("VirtualMachineSnapshot", "snapshot-5")]);

        assert!(match_snapshot(&trees, "root/c").is_empty());
    }
}
