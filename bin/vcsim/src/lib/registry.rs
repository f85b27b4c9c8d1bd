// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of inventory objects.
//!
//! Every managed entity (and every task) lives here, keyed by its managed
//! object reference. Mutable access bumps a generation counter which the
//! property collector watches to wake up pending `WaitForUpdatesEx` calls.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tokio::sync::watch;
use vim_api_types::mo::{self, ManagedEntity};
use vim_api_types::{MethodFault, MoRef};

/// An object held by the registry.
#[derive(Clone, Debug)]
pub enum ManagedObject {
    Folder(mo::Folder),
    Datacenter(mo::Datacenter),
    ComputeResource(mo::ComputeResource),
    Cluster(mo::ComputeResource),
    HostSystem(mo::HostSystem),
    ResourcePool(mo::ResourcePool),
    VirtualMachine(mo::VirtualMachine),
    Snapshot(mo::VirtualMachineSnapshot),
    Datastore(mo::Datastore),
    Network(mo::Network),
    Portgroup(mo::DistributedVirtualPortgroup),
    Switch(mo::DistributedVirtualSwitch),
    Task(mo::Task),
}

impl ManagedObject {
    /// The VIM type name of the object.
    pub fn kind(&self) -> &'static str {
        match self {
            ManagedObject::Folder(_) => "Folder",
            ManagedObject::Datacenter(_) => "Datacenter",
            ManagedObject::ComputeResource(_) => "ComputeResource",
            ManagedObject::Cluster(_) => "ClusterComputeResource",
            ManagedObject::HostSystem(_) => "HostSystem",
            ManagedObject::ResourcePool(_) => "ResourcePool",
            ManagedObject::VirtualMachine(_) => "VirtualMachine",
            ManagedObject::Snapshot(_) => "VirtualMachineSnapshot",
            ManagedObject::Datastore(_) => "Datastore",
            ManagedObject::Network(_) => "Network",
            ManagedObject::Portgroup(_) => "DistributedVirtualPortgroup",
            ManagedObject::Switch(_) => "VmwareDistributedVirtualSwitch",
            ManagedObject::Task(_) => "Task",
        }
    }

    pub fn entity(&self) -> Option<&ManagedEntity> {
        match self {
            ManagedObject::Folder(o) => Some(&o.entity),
            ManagedObject::Datacenter(o) => Some(&o.entity),
            ManagedObject::ComputeResource(o) | ManagedObject::Cluster(o) => {
                Some(&o.entity)
            }
            ManagedObject::HostSystem(o) => Some(&o.entity),
            ManagedObject::ResourcePool(o) => Some(&o.entity),
            ManagedObject::VirtualMachine(o) => Some(&o.entity),
            ManagedObject::Datastore(o) => Some(&o.entity),
            ManagedObject::Network(o) => Some(&o.entity),
            ManagedObject::Portgroup(o) => Some(&o.network.entity),
            ManagedObject::Switch(o) => Some(&o.entity),
            ManagedObject::Snapshot(_) | ManagedObject::Task(_) => None,
        }
    }

    pub fn entity_mut(&mut self) -> Option<&mut ManagedEntity> {
        match self {
            ManagedObject::Folder(o) => Some(&mut o.entity),
            ManagedObject::Datacenter(o) => Some(&mut o.entity),
            ManagedObject::ComputeResource(o) | ManagedObject::Cluster(o) => {
                Some(&mut o.entity)
            }
            ManagedObject::HostSystem(o) => Some(&mut o.entity),
            ManagedObject::ResourcePool(o) => Some(&mut o.entity),
            ManagedObject::VirtualMachine(o) => Some(&mut o.entity),
            ManagedObject::Datastore(o) => Some(&mut o.entity),
            ManagedObject::Network(o) => Some(&mut o.entity),
            ManagedObject::Portgroup(o) => Some(&mut o.network.entity),
            ManagedObject::Switch(o) => Some(&mut o.entity),
            ManagedObject::Snapshot(_) | ManagedObject::Task(_) => None,
        }
    }

    /// Renders the object's properties as VI/JSON.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            ManagedObject::Folder(o) => serde_json::to_value(o),
            ManagedObject::Datacenter(o) => serde_json::to_value(o),
            ManagedObject::ComputeResource(o) | ManagedObject::Cluster(o) => {
                serde_json::to_value(o)
            }
            ManagedObject::HostSystem(o) => serde_json::to_value(o),
            ManagedObject::ResourcePool(o) => serde_json::to_value(o),
            ManagedObject::VirtualMachine(o) => serde_json::to_value(o),
            ManagedObject::Snapshot(o) => serde_json::to_value(o),
            ManagedObject::Datastore(o) => serde_json::to_value(o),
            ManagedObject::Network(o) => serde_json::to_value(o),
            ManagedObject::Portgroup(o) => serde_json::to_value(o),
            ManagedObject::Switch(o) => serde_json::to_value(o),
            ManagedObject::Task(o) => serde_json::to_value(o),
        }
    }
}

/// Prefix of generated reference values for objects of `kind`.
fn prefix(kind: &str) -> &'static str {
    match kind {
        "Folder" => "group-",
        "Datacenter" => "datacenter-",
        "ClusterComputeResource" => "domain-c",
        "ComputeResource" => "domain-s",
        "HostSystem" => "host-",
        "ResourcePool" => "resgroup-",
        "VirtualMachine" => "vm-",
        "VirtualMachineSnapshot" => "snapshot-",
        "Datastore" => "datastore-",
        "Network" => "network-",
        "VmwareDistributedVirtualSwitch" => "dvs-",
        "DistributedVirtualPortgroup" => "dvportgroup-",
        "Task" => "task-",
        _ => "obj-",
    }
}

/// Escapes an entity name for use as an inventory path element.
pub fn escape_name(name: &str) -> String {
    name.replace('%', "%25").replace('/', "%2f")
}

pub struct Registry {
    objects: BTreeMap<MoRef, ManagedObject>,
    next_id: u64,
    root: MoRef,
    generation: watch::Sender<u64>,
}

macro_rules! accessors {
    ($($get:ident, $get_mut:ident => $variant:ident($ty:ty);)*) => {
        impl Registry {
            $(
                pub fn $get(&self, r: &MoRef) -> Result<&$ty, MethodFault> {
                    match self.objects.get(r) {
                        Some(ManagedObject::$variant(o)) => Ok(o),
                        _ => Err(MethodFault::not_found(r.clone())),
                    }
                }

                pub fn $get_mut(
                    &mut self,
                    r: &MoRef,
                ) -> Result<&mut $ty, MethodFault> {
                    self.touch();
                    match self.objects.get_mut(r) {
                        Some(ManagedObject::$variant(o)) => Ok(o),
                        _ => Err(MethodFault::not_found(r.clone())),
                    }
                }
            )*
        }
    };
}

accessors! {
    folder, folder_mut => Folder(mo::Folder);
    datacenter, datacenter_mut => Datacenter(mo::Datacenter);
    host, host_mut => HostSystem(mo::HostSystem);
    pool, pool_mut => ResourcePool(mo::ResourcePool);
    vm, vm_mut => VirtualMachine(mo::VirtualMachine);
    snapshot, snapshot_mut => Snapshot(mo::VirtualMachineSnapshot);
    datastore, datastore_mut => Datastore(mo::Datastore);
    network, network_mut => Network(mo::Network);
    portgroup, portgroup_mut => Portgroup(mo::DistributedVirtualPortgroup);
    switch, switch_mut => Switch(mo::DistributedVirtualSwitch);
    task, task_mut => Task(mo::Task);
}

impl Registry {
    /// Creates an empty registry whose root folder will be `root`.
    pub fn new(root: MoRef) -> Self {
        let (generation, _) = watch::channel(0);
        Registry { objects: BTreeMap::new(), next_id: 1, root, generation }
    }

    pub fn root_folder(&self) -> &MoRef {
        &self.root
    }

    /// Current generation of the inventory.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Subscribes to inventory changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Records a change to the inventory.
    pub fn touch(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// Allocates a fresh reference for an object of type `kind`.
    pub fn new_ref(&mut self, kind: &str) -> MoRef {
        self.next_id += 1;
        MoRef::new(kind, format!("{}{}", prefix(kind), self.next_id))
    }

    pub fn insert(&mut self, r: MoRef, obj: ManagedObject) {
        self.objects.insert(r, obj);
        self.touch();
    }

    /// Inserts `obj` under a freshly allocated reference.
    pub fn put(&mut self, obj: ManagedObject) -> MoRef {
        let r = self.new_ref(obj.kind());
        self.insert(r.clone(), obj);
        r
    }

    pub fn remove(&mut self, r: &MoRef) -> Option<ManagedObject> {
        let obj = self.objects.remove(r);
        if obj.is_some() {
            self.touch();
        }
        obj
    }

    /// Removes `r` together with every reference other objects hold to it.
    pub fn purge(&mut self, r: &MoRef) -> Option<ManagedObject> {
        let obj = self.remove(r)?;
        let forget = |list: &mut Vec<MoRef>| list.retain(|x| x != r);
        for o in self.objects.values_mut() {
            match o {
                ManagedObject::Folder(f) => forget(&mut f.child_entity),
                ManagedObject::Datacenter(dc) => {
                    forget(&mut dc.datastore);
                    forget(&mut dc.network);
                }
                ManagedObject::ComputeResource(c) | ManagedObject::Cluster(c) => {
                    forget(&mut c.host);
                    forget(&mut c.datastore);
                    forget(&mut c.network);
                    if c.resource_pool.as_ref() == Some(r) {
                        c.resource_pool = None;
                    }
                }
                ManagedObject::HostSystem(h) => {
                    forget(&mut h.vm);
                    forget(&mut h.datastore);
                    forget(&mut h.network);
                }
                ManagedObject::ResourcePool(p) => {
                    forget(&mut p.resource_pool);
                    forget(&mut p.vm);
                }
                ManagedObject::VirtualMachine(vm) => {
                    forget(&mut vm.datastore);
                    forget(&mut vm.network);
                    forget(&mut vm.root_snapshot);
                }
                ManagedObject::Snapshot(s) => forget(&mut s.child_snapshot),
                ManagedObject::Datastore(ds) => {
                    forget(&mut ds.vm);
                    ds.host.retain(|m| &m.key != r);
                }
                ManagedObject::Network(n) => {
                    forget(&mut n.host);
                    forget(&mut n.vm);
                }
                ManagedObject::Portgroup(pg) => {
                    forget(&mut pg.network.host);
                    forget(&mut pg.network.vm);
                }
                ManagedObject::Switch(dvs) => {
                    forget(&mut dvs.portgroup);
                    forget(&mut dvs.summary.host_member);
                }
                ManagedObject::Task(_) => {}
            }
        }
        Some(obj)
    }

    pub fn contains(&self, r: &MoRef) -> bool {
        self.objects.contains_key(r)
    }

    pub fn get(&self, r: &MoRef) -> Option<&ManagedObject> {
        self.objects.get(r)
    }

    pub fn get_mut(&mut self, r: &MoRef) -> Option<&mut ManagedObject> {
        self.touch();
        self.objects.get_mut(r)
    }

    pub fn lookup(&self, r: &MoRef) -> Result<&ManagedObject, MethodFault> {
        self.objects.get(r).ok_or_else(|| MethodFault::not_found(r.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MoRef, &ManagedObject)> {
        self.objects.iter()
    }

    /// References of every object of exactly type `kind`.
    pub fn all_of(&self, kind: &str) -> Vec<MoRef> {
        self.objects.keys().filter(|r| r.kind == kind).cloned().collect()
    }

    pub fn entity(&self, r: &MoRef) -> Result<&ManagedEntity, MethodFault> {
        self.objects
            .get(r)
            .and_then(ManagedObject::entity)
            .ok_or_else(|| MethodFault::not_found(r.clone()))
    }

    pub fn entity_mut(
        &mut self,
        r: &MoRef,
    ) -> Result<&mut ManagedEntity, MethodFault> {
        self.touch();
        self.objects
            .get_mut(r)
            .and_then(ManagedObject::entity_mut)
            .ok_or_else(|| MethodFault::not_found(r.clone()))
    }

    pub fn name(&self, r: &MoRef) -> Option<&str> {
        self.objects
            .get(r)
            .and_then(ManagedObject::entity)
            .map(|e| e.name.as_str())
    }

    /// A compute resource or cluster.
    pub fn compute(
        &self,
        r: &MoRef,
    ) -> Result<&mo::ComputeResource, MethodFault> {
        match self.objects.get(r) {
            Some(
                ManagedObject::ComputeResource(o) | ManagedObject::Cluster(o),
            ) => Ok(o),
            _ => Err(MethodFault::not_found(r.clone())),
        }
    }

    pub fn compute_mut(
        &mut self,
        r: &MoRef,
    ) -> Result<&mut mo::ComputeResource, MethodFault> {
        self.touch();
        match self.objects.get_mut(r) {
            Some(
                ManagedObject::ComputeResource(o) | ManagedObject::Cluster(o),
            ) => Ok(o),
            _ => Err(MethodFault::not_found(r.clone())),
        }
    }

    /// Inventory children of `r`.
    pub fn children(&self, r: &MoRef) -> Vec<MoRef> {
        match self.objects.get(r) {
            Some(ManagedObject::Folder(f)) => f.child_entity.clone(),
            Some(ManagedObject::Datacenter(dc)) => vec![
                dc.vm_folder.clone(),
                dc.host_folder.clone(),
                dc.datastore_folder.clone(),
                dc.network_folder.clone(),
            ],
            Some(
                ManagedObject::ComputeResource(c) | ManagedObject::Cluster(c),
            ) => {
                let mut children = c.host.clone();
                children.extend(c.resource_pool.iter().cloned());
                children
            }
            Some(ManagedObject::ResourcePool(p)) => {
                let mut children = p.resource_pool.clone();
                children.extend(p.vm.iter().cloned());
                children
            }
            Some(ManagedObject::HostSystem(h)) => h.vm.clone(),
            _ => Vec::new(),
        }
    }

    /// Every descendant of `r`, excluding `r` itself, each listed once.
    pub fn descendants(&self, r: &MoRef) -> Vec<MoRef> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut stack = self.children(r);
        stack.reverse();
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            let mut children = self.children(&next);
            children.reverse();
            stack.extend(children);
            out.push(next);
        }
        out
    }

    /// Finds the child of `parent` named `name`.
    pub fn find_child(&self, parent: &MoRef, name: &str) -> Option<MoRef> {
        self.children(parent)
            .into_iter()
            .find(|c| self.name(c) == Some(name))
    }

    /// Renders the inventory path of `r`, such as `/DC0/vm/DC0_H0_VM0`.
    pub fn inventory_path(&self, r: &MoRef) -> String {
        let mut names = Vec::new();
        let mut cursor = Some(r.clone());
        while let Some(cur) = cursor {
            let Some(entity) = self.get(&cur).and_then(ManagedObject::entity)
            else {
                break;
            };
            if entity.parent.is_none() {
                break;
            }
            names.push(escape_name(&entity.name));
            cursor = entity.parent.clone();
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    /// The datacenter containing `r`, if any.
    pub fn datacenter_of(&self, r: &MoRef) -> Option<MoRef> {
        let mut cursor = Some(r.clone());
        while let Some(cur) = cursor {
            if cur.kind == "Datacenter" {
                return Some(cur);
            }
            cursor = self.entity(&cur).ok().and_then(|e| e.parent.clone());
        }
        None
    }

    /// Returns true if `ancestor` is `r` or one of its parents.
    pub fn is_descendant(&self, r: &MoRef, ancestor: &MoRef) -> bool {
        let mut cursor = Some(r.clone());
        while let Some(cur) = cursor {
            if &cur == ancestor {
                return true;
            }
            cursor = self.entity(&cur).ok().and_then(|e| e.parent.clone());
        }
        false
    }
}
