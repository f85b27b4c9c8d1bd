// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Singleton managers named by the service content.

use vim_api_types::event::{Event, EventFilterSpec};
use vim_api_types::methods::{
    CreateTaskRequest, FindByDnsNameRequest, FindByInventoryPathRequest,
    FindByIpRequest, FindByUuidRequest, FindChildRequest, PostEventRequest,
    QueryEventsRequest, QueryOptionsRequest, UpdateOptionsRequest,
};
use vim_api_types::task::TaskInfo;
use vim_api_types::{MoRef, OptionValue};

use super::managed_object;
use crate::task::Task;
use crate::{vim25, Error, Result};

managed_object!(
    /// The `SearchIndex`.
    SearchIndex
);

impl SearchIndex {
    pub fn of(client: &vim25::Client) -> Result<Self> {
        let this = client
            .service_content()
            .search_index
            .clone()
            .ok_or(Error::Unsupported("search index"))?;
        Ok(SearchIndex::new(client, this))
    }

    /// Looks up an entity by its inventory path, such as
    /// `DC0/vm/DC0_H0_VM0`.
    pub async fn find_by_inventory_path(&self, path: &str) -> Result<Option<MoRef>> {
        let req = FindByInventoryPathRequest { inventory_path: path.to_string() };
        self.invoke("FindByInventoryPath", &req).await
    }

    /// The direct child of `entity` called `name`.
    pub async fn find_child(&self, entity: &MoRef, name: &str) -> Result<Option<MoRef>> {
        let req = FindChildRequest { entity: entity.clone(), name: name.to_string() };
        self.invoke("FindChild", &req).await
    }

    /// A VM (`vm_search`) or host by BIOS UUID, or by instance UUID when
    /// `instance_uuid` is set.
    pub async fn find_by_uuid(
        &self,
        datacenter: Option<&MoRef>,
        uuid: &str,
        vm_search: bool,
        instance_uuid: bool,
    ) -> Result<Option<MoRef>> {
        let req = uuid_request(datacenter, uuid, vm_search, instance_uuid);
        self.invoke("FindByUuid", &req).await
    }

    pub async fn find_all_by_uuid(
        &self,
        datacenter: Option<&MoRef>,
        uuid: &str,
        vm_search: bool,
        instance_uuid: bool,
    ) -> Result<Vec<MoRef>> {
        let req = uuid_request(datacenter, uuid, vm_search, instance_uuid);
        let found: Option<Vec<MoRef>> = self.invoke("FindAllByUuid", &req).await?;
        Ok(found.unwrap_or_default())
    }

    pub async fn find_by_dns_name(
        &self,
        datacenter: Option<&MoRef>,
        dns_name: &str,
        vm_search: bool,
    ) -> Result<Option<MoRef>> {
        let req = FindByDnsNameRequest {
            datacenter: datacenter.cloned(),
            dns_name: dns_name.to_string(),
            vm_search,
        };
        self.invoke("FindByDnsName", &req).await
    }

    pub async fn find_all_by_dns_name(
        &self,
        datacenter: Option<&MoRef>,
        dns_name: &str,
        vm_search: bool,
    ) -> Result<Vec<MoRef>> {
        let req = FindByDnsNameRequest {
            datacenter: datacenter.cloned(),
            dns_name: dns_name.to_string(),
            vm_search,
        };
        let found: Option<Vec<MoRef>> = self.invoke("FindAllByDnsName", &req).await?;
        Ok(found.unwrap_or_default())
    }

    pub async fn find_by_ip(
        &self,
        datacenter: Option<&MoRef>,
        ip: &str,
        vm_search: bool,
    ) -> Result<Option<MoRef>> {
        let req = FindByIpRequest { datacenter: datacenter.cloned(), ip: ip.to_string(), vm_search };
        self.invoke("FindByIp", &req).await
    }

    pub async fn find_all_by_ip(
        &self,
        datacenter: Option<&MoRef>,
        ip: &str,
        vm_search: bool,
    ) -> Result<Vec<MoRef>> {
        let req = FindByIpRequest { datacenter: datacenter.cloned(), ip: ip.to_string(), vm_search };
        let found: Option<Vec<MoRef>> = self.invoke("FindAllByIp", &req).await?;
        Ok(found.unwrap_or_default())
    }
}

fn uuid_request(
    datacenter: Option<&MoRef>,
    uuid: &str,
    vm_search: bool,
    instance_uuid: bool,
) -> FindByUuidRequest {
    FindByUuidRequest {
        datacenter: datacenter.cloned(),
        uuid: uuid.to_string(),
        vm_search,
        instance_uuid: instance_uuid.then_some(true),
    }
}

managed_object!(
    /// The `EventManager`.
    EventManager
);

impl EventManager {
    pub fn of(client: &vim25::Client) -> Result<Self> {
        let this = client
            .service_content()
            .event_manager
            .clone()
            .ok_or(Error::Unsupported("event manager"))?;
        Ok(EventManager::new(client, this))
    }

    pub async fn query_events(&self, filter: EventFilterSpec) -> Result<Vec<Event>> {
        let events: Option<Vec<Event>> =
            self.invoke("QueryEvents", &QueryEventsRequest { filter }).await?;
        Ok(events.unwrap_or_default())
    }

    /// Records a user event.
    pub async fn post_event(&self, event: Event) -> Result<()> {
        self.invoke("PostEvent", &PostEventRequest { event_to_post: event }).await
    }

    pub async fn latest_event(&self) -> Result<Option<Event>> {
        self.property("latestEvent").await
    }
}

managed_object!(
    /// An `OptionManager`, such as the endpoint's advanced settings.
    OptionManager
);

impl OptionManager {
    /// The endpoint's settings manager.
    pub fn of(client: &vim25::Client) -> Result<Self> {
        let this = client
            .service_content()
            .setting
            .clone()
            .ok_or(Error::Unsupported("option manager"))?;
        Ok(OptionManager::new(client, this))
    }

    /// Settings whose key starts with `name`.
    pub async fn query(&self, name: &str) -> Result<Vec<OptionValue>> {
        let req = QueryOptionsRequest { name: Some(name.to_string()) };
        let found: Option<Vec<OptionValue>> = self.invoke("QueryOptions", &req).await?;
        Ok(found.unwrap_or_default())
    }

    pub async fn update(&self, changed: Vec<OptionValue>) -> Result<()> {
        self.invoke("UpdateOptions", &UpdateOptionsRequest { changed_value: changed })
            .await
    }

    pub async fn settings(&self) -> Result<Vec<OptionValue>> {
        let all: Option<Vec<OptionValue>> = self.property("setting").await?;
        Ok(all.unwrap_or_default())
    }
}

managed_object!(
    /// The `TaskManager`.
    TaskManager
);

impl TaskManager {
    pub fn of(client: &vim25::Client) -> Result<Self> {
        let this = client
            .service_content()
            .task_manager
            .clone()
            .ok_or(Error::Unsupported("task manager"))?;
        Ok(TaskManager::new(client, this))
    }

    /// Creates a task against `obj` that the caller drives with
    /// [`Task::set_state`] and [`Task::update_progress`].
    pub async fn create_task(
        &self,
        obj: &MoRef,
        task_type_id: &str,
        initiated_by: Option<&str>,
        cancelable: bool,
    ) -> Result<(Task, TaskInfo)> {
        let req = CreateTaskRequest {
            obj: obj.clone(),
            task_type_id: task_type_id.to_string(),
            initiated_by: initiated_by.map(str::to_string),
            cancelable,
        };
        let info: TaskInfo = self.invoke("CreateTask", &req).await?;
        Ok((Task::new(self.client(), info.task.clone()), info))
    }

    pub async fn recent_tasks(&self) -> Result<Vec<Task>> {
        let recent: Option<Vec<MoRef>> = self.property("recentTask").await?;
        Ok(recent
            .unwrap_or_default()
            .into_iter()
            .map(|t| Task::new(self.client(), t))
            .collect())
    }
}
