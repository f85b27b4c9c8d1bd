// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed wrappers over managed object references.
//!
//! Every wrapper dereferences to [`Common`], which carries the operations
//! shared by all managed entities.

use serde::de::DeserializeOwned;
use serde::Serialize;
use vim_api_types::methods::RenameRequest;
use vim_api_types::MoRef;

use crate::task::Task;
use crate::{property, vim25, Result};

mod compute;
mod folder;
mod manager;
mod vm;

pub use compute::{ClusterComputeResource, Datastore, HostSystem, ResourcePool};
pub use folder::{Datacenter, DatacenterFolders, Folder};
pub use manager::{EventManager, OptionManager, SearchIndex, TaskManager};
pub use vm::{VirtualMachine, VirtualMachineSnapshot};

/// A reference bound to the client it is used with.
#[derive(Clone)]
pub struct Common {
    client: vim25::Client,
    this: MoRef,
}

impl Common {
    pub fn new(client: &vim25::Client, this: MoRef) -> Self {
        Common { client: client.clone(), this }
    }

    pub fn reference(&self) -> &MoRef {
        &self.this
    }

    pub fn client(&self) -> &vim25::Client {
        &self.client
    }

    /// Reads the property at `path`.
    pub async fn property<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.client.property(&self.this, path).await
    }

    /// Retrieves `props` into `T`, nesting dotted paths.
    pub async fn properties<T: DeserializeOwned>(&self, props: &[&str]) -> Result<T> {
        property::Collector::new(&self.client).retrieve_into(&self.this, props).await
    }

    pub async fn name(&self) -> Result<String> {
        self.property("name").await
    }

    pub async fn parent(&self) -> Result<Option<MoRef>> {
        self.property("parent").await
    }

    /// The `/`-separated names from the root folder down to this object.
    pub async fn inventory_path(&self) -> Result<String> {
        let mut names = Vec::new();
        let mut next = Some(self.this.clone());
        while let Some(obj) = next {
            let common = Common::new(&self.client, obj);
            next = common.parent().await?;
            // The root folder contributes the leading separator only.
            if next.is_some() {
                names.push(common.name().await?);
            }
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    pub async fn rename(&self, new_name: &str) -> Result<Task> {
        let req = RenameRequest { new_name: new_name.to_string() };
        self.task("Rename_Task", &req).await
    }

    pub async fn destroy(&self) -> Result<Task> {
        self.task("Destroy_Task", &serde_json::json!({})).await
    }

    pub async fn reload(&self) -> Result<()> {
        self.client.call(&self.this, "Reload").await
    }

    /// Invokes a `*_Task` method, returning the task it started.
    pub(crate) async fn task<A: Serialize + ?Sized>(&self, method: &str, args: &A) -> Result<Task> {
        let task: MoRef = self.client.invoke(&self.this, method, args).await?;
        Ok(Task::new(&self.client, task))
    }

    pub(crate) async fn invoke<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.client.invoke(&self.this, method, args).await
    }
}

/// Declares a wrapper type dereferencing to [`Common`].
macro_rules! managed_object {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            common: $crate::object::Common,
        }

        impl $name {
            pub fn new(client: &$crate::vim25::Client, this: vim_api_types::MoRef) -> Self {
                $name { common: $crate::object::Common::new(client, this) }
            }
        }

        impl std::ops::Deref for $name {
            type Target = $crate::object::Common;

            fn deref(&self) -> &Self::Target {
                &self.common
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.common.reference())
            }
        }
    };
}

pub(crate) use managed_object;
