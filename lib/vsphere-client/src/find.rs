// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inventory lookup by path.
//!
//! Absolute paths (`/DC0/vm/DC0_H0_VM0`) are resolved from the root folder.
//! Relative paths are resolved from the datacenter folder holding the kind
//! being looked up, so `DC0_H0_VM0` names a VM in the datacenter's `vm`
//! folder. A relative path with a single element also matches anywhere
//! below that folder. Path elements may use `*` and `?` wildcards.

use slog::debug;
use vim_api_types::MoRef;

use crate::object::{
    ClusterComputeResource, Datacenter, DatacenterFolders, Datastore, Folder,
    HostSystem, ResourcePool, SearchIndex, VirtualMachine,
};
use crate::{view, vim25, Error, Result};

/// The datacenter folder an inventory kind lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Place {
    /// The root folder, whatever the datacenter.
    Root,
    /// The datacenter itself, or the root folder when none is set.
    Datacenter,
    Vm,
    Host,
    Datastore,
    Network,
}

#[derive(Clone)]
pub struct Finder {
    client: vim25::Client,
    datacenter: Option<Datacenter>,
}

impl Finder {
    pub fn new(client: &vim25::Client) -> Self {
        Finder { client: client.clone(), datacenter: None }
    }

    /// Resolves relative paths against `dc` from now on.
    pub fn set_datacenter(&mut self, dc: Datacenter) -> &mut Self {
        self.datacenter = Some(dc);
        self
    }

    pub fn datacenter_ref(&self) -> Option<&Datacenter> {
        self.datacenter.as_ref()
    }

    pub async fn datacenters(&self, path: &str) -> Result<Vec<Datacenter>> {
        let found = self.find(Place::Root, &["Datacenter"], path).await?;
        Ok(found.into_iter().map(|r| Datacenter::new(&self.client, r)).collect())
    }

    pub async fn datacenter(&self, path: &str) -> Result<Datacenter> {
        let found = self.find(Place::Root, &["Datacenter"], path).await?;
        let dc = one("datacenter", path, found)?;
        Ok(Datacenter::new(&self.client, dc))
    }

    /// The only datacenter of the endpoint.
    pub async fn default_datacenter(&self) -> Result<Datacenter> {
        self.datacenter("*").await.map_err(|e| match e {
            Error::NotFound { kind, .. } => Error::NotFound { kind, path: "default".into() },
            Error::Multiple { kind, .. } => Error::Multiple { kind, path: "default".into() },
            e => e,
        })
    }

    pub async fn virtual_machines(&self, path: &str) -> Result<Vec<VirtualMachine>> {
        let found = self.find(Place::Vm, &["VirtualMachine"], path).await?;
        Ok(found.into_iter().map(|r| VirtualMachine::new(&self.client, r)).collect())
    }

    pub async fn virtual_machine(&self, path: &str) -> Result<VirtualMachine> {
        let found = self.find(Place::Vm, &["VirtualMachine"], path).await?;
        Ok(VirtualMachine::new(&self.client, one("vm", path, found)?))
    }

    pub async fn host_systems(&self, path: &str) -> Result<Vec<HostSystem>> {
        let found = self.find(Place::Host, &["HostSystem"], path).await?;
        Ok(found.into_iter().map(|r| HostSystem::new(&self.client, r)).collect())
    }

    pub async fn host_system(&self, path: &str) -> Result<HostSystem> {
        let found = self.find(Place::Host, &["HostSystem"], path).await?;
        Ok(HostSystem::new(&self.client, one("host", path, found)?))
    }

    /// Clusters and standalone compute resources.
    pub async fn compute_resources(&self, path: &str) -> Result<Vec<ClusterComputeResource>> {
        let found = self.find(Place::Host, &["ComputeResource"], path).await?;
        Ok(found
            .into_iter()
            .map(|r| ClusterComputeResource::new(&self.client, r))
            .collect())
    }

    pub async fn cluster(&self, path: &str) -> Result<ClusterComputeResource> {
        let found = self.find(Place::Host, &["ClusterComputeResource"], path).await?;
        Ok(ClusterComputeResource::new(&self.client, one("cluster", path, found)?))
    }

    pub async fn resource_pools(&self, path: &str) -> Result<Vec<ResourcePool>> {
        let found = self.find(Place::Host, &["ResourcePool"], path).await?;
        Ok(found.into_iter().map(|r| ResourcePool::new(&self.client, r)).collect())
    }

    pub async fn resource_pool(&self, path: &str) -> Result<ResourcePool> {
        let found = self.find(Place::Host, &["ResourcePool"], path).await?;
        Ok(ResourcePool::new(&self.client, one("resource pool", path, found)?))
    }

    /// The datacenter's only root resource pool.
    pub async fn default_resource_pool(&self) -> Result<ResourcePool> {
        let pools = self.find(Place::Host, &["ResourcePool"], "*/Resources").await?;
        Ok(ResourcePool::new(&self.client, one("resource pool", "default", pools)?))
    }

    pub async fn datastores(&self, path: &str) -> Result<Vec<Datastore>> {
        let found = self.find(Place::Datastore, &["Datastore"], path).await?;
        Ok(found.into_iter().map(|r| Datastore::new(&self.client, r)).collect())
    }

    pub async fn datastore(&self, path: &str) -> Result<Datastore> {
        let found = self.find(Place::Datastore, &["Datastore"], path).await?;
        Ok(Datastore::new(&self.client, one("datastore", path, found)?))
    }

    pub async fn default_datastore(&self) -> Result<Datastore> {
        self.datastore("*").await
    }

    /// Standard networks, distributed port groups and switches.
    pub async fn networks(&self, path: &str) -> Result<Vec<MoRef>> {
        self.find(
            Place::Network,
            &["Network", "DistributedVirtualPortgroup", "DistributedVirtualSwitch"],
            path,
        )
        .await
    }

    pub async fn network(&self, path: &str) -> Result<MoRef> {
        one("network", path, self.networks(path).await?)
    }

    /// A folder; relative paths start at the datacenter itself, as in
    /// `vm/templates`.
    pub async fn folder(&self, path: &str) -> Result<Folder> {
        let found = self.find(Place::Datacenter, &["Folder"], path).await?;
        Ok(Folder::new(&self.client, one("folder", path, found)?))
    }

    /// Every managed entity directly below `path`.
    pub async fn list(&self, path: &str) -> Result<Vec<MoRef>> {
        let search = SearchIndex::of(&self.client)?;
        let target = match path.trim_matches('/') {
            "" => Some(self.client.service_content().root_folder.clone()),
            path => search.find_by_inventory_path(path).await?,
        };
        let target = target.ok_or_else(|| Error::NotFound { kind: "path", path: path.into() })?;
        children(&self.client, &target).await
    }

    async fn find(&self, place: Place, kinds: &[&str], path: &str) -> Result<Vec<MoRef>> {
        let (start, rest) = match path.strip_prefix('/') {
            Some(rest) => (self.client.service_content().root_folder.clone(), rest),
            None => (self.start(place).await?, path),
        };
        let elems = split(rest);
        debug!(self.client.log(), "finder lookup";
            "path" => path, "start" => %start, "kinds" => ?kinds);

        let found = match elems.as_slice() {
            [] => vec![start],
            // A lone relative name is searched for below the start folder.
            [name] if !path.starts_with('/') => {
                let mut found = self.descendants(&start, kinds, name).await?;
                if found.is_empty() {
                    found = self.walk(&start, &elems).await?;
                }
                found
            }
            _ => self.walk(&start, &elems).await?,
        };
        Ok(found
            .into_iter()
            .filter(|r| kinds.iter().any(|k| is_kind_of(&r.kind, k)))
            .collect())
    }

    /// The folder relative paths of `place` start from.
    async fn start(&self, place: Place) -> Result<MoRef> {
        let root = self.client.service_content().root_folder.clone();
        let dc = match (place, &self.datacenter) {
            (Place::Root, _) | (Place::Datacenter, None) => return Ok(root),
            (Place::Datacenter, Some(dc)) => return Ok(dc.reference().clone()),
            (_, Some(dc)) => dc.clone(),
            (_, None) => {
                let found = self.descendants(&root, &["Datacenter"], "*").await?;
                Datacenter::new(&self.client, one("datacenter", "default", found)?)
            }
        };
        let folders: DatacenterFolders = dc.folders().await?;
        Ok(match place {
            Place::Root | Place::Datacenter | Place::Vm => folders.vm_folder,
            Place::Host => folders.host_folder,
            Place::Datastore => folders.datastore_folder,
            Place::Network => folders.network_folder,
        })
    }

    /// Follows `elems` down from `start`, expanding wildcards.
    async fn walk(&self, start: &MoRef, elems: &[String]) -> Result<Vec<MoRef>> {
        let mut current = vec![start.clone()];
        for elem in elems {
            let mut next = Vec::new();
            for parent in &current {
                for (child, name) in named_children(&self.client, parent).await? {
                    if matches(elem, &name) {
                        next.push(child);
                    }
                }
            }
            current = next;
        }
        Ok(current)
    }

    async fn descendants(&self, start: &MoRef, kinds: &[&str], pattern: &str) -> Result<Vec<MoRef>> {
        let views = view::Manager::new(&self.client)?;
        let container = views.create_container_view(start, kinds, true).await?;
        let mut found = Vec::new();
        let listed = async {
            for kind in kinds {
                for obj in container.retrieve(kind, &["name"]).await? {
                    let name = obj.prop_set.iter().find(|p| p.name == "name");
                    if name.and_then(|p| p.val.as_str()).is_some_and(|n| matches(pattern, n)) {
                        found.push(obj.obj);
                    }
                }
            }
            Ok::<_, Error>(())
        }
        .await;
        if let Err(e) = container.destroy().await {
            debug!(self.client.log(), "view cleanup failed"; "error" => %e);
        }
        listed?;
        found.sort();
        found.dedup();
        Ok(found)
    }
}

/// Direct inventory children of `parent`.
async fn children(client: &vim25::Client, parent: &MoRef) -> Result<Vec<MoRef>> {
    Ok(named_children(client, parent).await?.into_iter().map(|(r, _)| r).collect())
}

async fn named_children(client: &vim25::Client, parent: &MoRef) -> Result<Vec<(MoRef, String)>> {
    let views = view::Manager::new(client)?;
    let container = views.create_container_view(parent, &["ManagedEntity"], false).await?;
    let listed = container.retrieve("ManagedEntity", &["name"]).await;
    if let Err(e) = container.destroy().await {
        debug!(client.log(), "view cleanup failed"; "error" => %e);
    }
    Ok(listed?
        .into_iter()
        .map(|obj| {
            let name = obj
                .prop_set
                .iter()
                .find(|p| p.name == "name")
                .and_then(|p| p.val.as_str())
                .unwrap_or_default()
                .to_string();
            (obj.obj, name)
        })
        .collect())
}

fn one(kind: &'static str, path: &str, found: Vec<MoRef>) -> Result<MoRef> {
    let mut found = found.into_iter();
    match (found.next(), found.next()) {
        (Some(r), None) => Ok(r),
        (None, _) => Err(Error::NotFound { kind, path: path.to_string() }),
        (Some(_), Some(_)) => Err(Error::Multiple { kind, path: path.to_string() }),
    }
}

/// Splits a relative path into names, unescaping `%2f` in each element.
fn split(path: &str) -> Vec<String> {
    path.split('/').filter(|e| !e.is_empty()).map(unescape).collect()
}

fn unescape(name: &str) -> String {
    name.replace("%2f", "/").replace("%2F", "/").replace("%5c", "\\").replace("%25", "%")
}

/// Entity types accepted where `want` is requested.
fn is_kind_of(kind: &str, want: &str) -> bool {
    kind == want
        || want == "ManagedEntity"
        || (want == "ComputeResource" && kind == "ClusterComputeResource")
        || (want == "Network" && kind == "DistributedVirtualPortgroup")
        || (want == "DistributedVirtualSwitch" && kind == "VmwareDistributedVirtualSwitch")
        || (want == "ResourcePool" && kind == "VirtualApp")
}

/// Glob match supporting `*` and `?`.
fn matches(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ni < n.len() {
        match p.get(pi) {
            Some('*') => {
                star = Some((pi, ni));
                pi += 1;
            }
            Some(&c) if c == '?' || c == n[ni] => {
                pi += 1;
                ni += 1;
            }
            _ => match star {
                Some((sp, sn)) => {
                    pi = sp + 1;
                    ni = sn + 1;
                    star = Some((sp, sn + 1));
                }
                None => return false,
            },
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        assert!(matches("*", "DC0_H0_VM0"));
        assert!(matches("DC0_*", "DC0_H0_VM0"));
        assert!(matches("*_VM?", "DC0_H0_VM1"));
        assert!(matches("DC0_H0_VM0", "DC0_H0_VM0"));
        assert!(!matches("DC0_H0_VM0", "DC0_H0_VM01"));
        assert!(!matches("DC1_*", "DC0_H0_VM0"));
        assert!(matches("*C0*VM*", "DC0_C0_RP0_VM0"));
        assert!(!matches("?", ""));
    }

    #[test]
    fn paths_split_into_unescaped_names() {
        assert_eq!(split("DC0/vm/a%2fb"), vec!["DC0", "vm", "a/b"]);
        assert_eq!(split("//host//DC0_C0/"), vec!["host", "DC0_C0"]);
        assert!(split("").is_empty());
    }

    #[test]
    fn exactly_one() {
        let a = MoRef::new("VirtualMachine", "vm-1");
        let b = MoRef::new("VirtualMachine", "vm-2");
        assert_eq!(one("vm", "x", vec![a.clone()]).unwrap(), a);
        assert!(matches!(one("vm", "x", vec![]), Err(Error::NotFound { .. })));
        assert!(matches!(one("vm", "x", vec![a, b]), Err(Error::Multiple { .. })));
    }

    #[test]
    fn subtypes_satisfy_their_parents() {
        assert!(is_kind_of("ClusterComputeResource", "ComputeResource"));
        assert!(!is_kind_of("ComputeResource", "ClusterComputeResource"));
        assert!(is_kind_of("DistributedVirtualPortgroup", "Network"));
        assert!(is_kind_of("Folder", "ManagedEntity"));
    }
}
