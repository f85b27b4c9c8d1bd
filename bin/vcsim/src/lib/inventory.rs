// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The simulator's shared VIM state.

use std::collections::{BTreeMap, VecDeque};

use vim_api_types::mo;
use vim_api_types::{AboutInfo, MethodFault, MoRef, ServiceContent};

use crate::registry::Registry;
use crate::ssoadmin::Directory;
use crate::vim::event::History;
use crate::vim::option::Settings;
use crate::vim::property::{Collector, Filter};
use crate::vim::session::Sessions;

pub const SERVICE_INSTANCE: &str = "ServiceInstance";
pub const SESSION_MANAGER: &str = "SessionManager";
pub const PROPERTY_COLLECTOR: &str = "propertyCollector";
pub const VIEW_MANAGER: &str = "ViewManager";
pub const SEARCH_INDEX: &str = "SearchIndex";
pub const TASK_MANAGER: &str = "TaskManager";
pub const EVENT_MANAGER: &str = "EventManager";
pub const SETTING: &str = "VpxSettings";

/// Tasks listed in `TaskManager.recentTask` and kept in the registry.
const RECENT_TASKS: usize = 200;

pub fn singleton(kind: &str, value: &str) -> MoRef {
    MoRef::new(kind, value)
}

pub fn service_instance() -> MoRef {
    singleton("ServiceInstance", SERVICE_INSTANCE)
}

/// An object owned by a single session: property collectors, filters and
/// views.
pub struct Scoped {
    pub owner: String,
    pub object: ScopedObject,
}

pub enum ScopedObject {
    Collector(Collector),
    Filter(Filter),
    /// The `view` member is ignored; it is computed on every read.
    ContainerView(mo::ContainerView),
    ListView(mo::ListView),
}

pub struct Inventory {
    pub registry: Registry,
    pub content: ServiceContent,
    pub sessions: Sessions,
    pub scoped: BTreeMap<MoRef, Scoped>,
    pub events: History,
    pub settings: Settings,
    pub recent_tasks: VecDeque<MoRef>,
    pub sso: Directory,
}

impl Inventory {
    pub fn new(esx: bool, settings: Settings) -> Self {
        let root = if esx {
            MoRef::new("Folder", "ha-folder-root")
        } else {
            MoRef::new("Folder", "group-d1")
        };
        let content = service_content(esx, root.clone());
        Inventory {
            registry: Registry::new(root),
            content,
            sessions: Sessions::default(),
            scoped: BTreeMap::new(),
            events: History::default(),
            settings,
            recent_tasks: VecDeque::new(),
            sso: Directory::default(),
        }
    }

    pub fn is_vcenter(&self) -> bool {
        self.content.is_vcenter()
    }

    /// Returns true if `r` names one of the service content singletons.
    pub fn is_singleton(&self, r: &MoRef) -> bool {
        let content = &self.content;
        let known = [
            Some(&content.property_collector),
            content.view_manager.as_ref(),
            content.setting.as_ref(),
            content.session_manager.as_ref(),
            content.search_index.as_ref(),
            content.task_manager.as_ref(),
            content.event_manager.as_ref(),
        ];
        r == &service_instance() || known.into_iter().flatten().any(|k| k == r)
    }

    /// Resolves a scoped object, checking it belongs to `session`.
    pub fn scoped(
        &self,
        session: Option<&str>,
        r: &MoRef,
    ) -> Result<&ScopedObject, MethodFault> {
        match (self.scoped.get(r), session) {
            (Some(s), Some(key)) if s.owner == key => Ok(&s.object),
            _ => Err(MethodFault::not_found(r.clone())),
        }
    }

    pub fn scoped_mut(
        &mut self,
        session: Option<&str>,
        r: &MoRef,
    ) -> Result<&mut ScopedObject, MethodFault> {
        match (self.scoped.get_mut(r), session) {
            (Some(s), Some(key)) if s.owner == key => Ok(&mut s.object),
            _ => Err(MethodFault::not_found(r.clone())),
        }
    }

    /// Allocates a reference for an object scoped to `session`.
    pub fn scoped_ref(session: &str, kind: &str) -> MoRef {
        MoRef::new(kind, format!("session[{}]{}", session, uuid::Uuid::new_v4()))
    }

    /// Drops every object owned by `session`.
    pub fn drop_scoped(&mut self, session: &str) {
        self.scoped.retain(|_, s| s.owner != session);
    }

    /// Records a new task, evicting the oldest finished tasks beyond the
    /// history bound.
    pub fn remember_task(&mut self, task: MoRef) {
        self.recent_tasks.push_back(task);
        while self.recent_tasks.len() > RECENT_TASKS {
            let Some(old) = self.recent_tasks.pop_front() else {
                break;
            };
            self.registry.remove(&old);
        }
    }
}

/// Product information of a simulated ESX host.
pub fn esx_about(instance_uuid: String) -> AboutInfo {
    AboutInfo {
        name: "VMware ESXi".into(),
        full_name: "VMware ESXi 8.0.1 build-21495797".into(),
        vendor: "VMware, Inc.".into(),
        version: "8.0.1".into(),
        build: "21495797".into(),
        os_type: "vmnix-x86".into(),
        product_line_id: "embeddedEsx".into(),
        api_type: "HostAgent".into(),
        api_version: vim_api_types::API_RELEASE.into(),
        instance_uuid,
        license_product_name: "VMware ESX Server".into(),
        license_product_version: "8.0".into(),
    }
}

fn service_content(esx: bool, root: MoRef) -> ServiceContent {
    let instance_uuid = uuid::Uuid::new_v4().to_string();
    let about = if esx {
        esx_about(instance_uuid)
    } else {
        AboutInfo {
            name: "VMware vCenter Server".into(),
            full_name: "VMware vCenter Server 8.0.1 build-21560480".into(),
            vendor: "VMware, Inc.".into(),
            version: "8.0.1".into(),
            build: "21560480".into(),
            os_type: "linux-x64".into(),
            product_line_id: "vpx".into(),
            api_type: "VirtualCenter".into(),
            api_version: vim_api_types::API_RELEASE.into(),
            instance_uuid,
            license_product_name: "VMware VirtualCenter Server".into(),
            license_product_version: "8.0".into(),
        }
    };
    let (setting, search_index) = if esx {
        (
            singleton("OptionManager", "HostAgentSettings"),
            singleton("SearchIndex", "ha-searchindex"),
        )
    } else {
        (
            singleton("OptionManager", SETTING),
            singleton("SearchIndex", SEARCH_INDEX),
        )
    };
    ServiceContent {
        root_folder: root,
        property_collector: singleton("PropertyCollector", PROPERTY_COLLECTOR),
        view_manager: Some(singleton("ViewManager", VIEW_MANAGER)),
        about,
        setting: Some(setting),
        session_manager: Some(singleton("SessionManager", SESSION_MANAGER)),
        search_index: Some(search_index),
        task_manager: Some(singleton("TaskManager", TASK_MANAGER)),
        event_manager: Some(singleton("EventManager", EVENT_MANAGER)),
    }
}
