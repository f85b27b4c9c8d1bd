// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Events recorded by the event manager.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::MoRef;

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEventArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<MoRef>,
}

/// An event. `kind` names the event type, such as `VmPoweredOnEvent`.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "_typeName")]
    pub kind: String,
    #[serde(default)]
    pub key: i32,
    #[serde(default)]
    pub chain_id: i32,
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<EntityEventArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_resource: Option<EntityEventArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<EntityEventArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm: Option<EntityEventArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_formatted_message: Option<String>,
}

impl Event {
    /// Entities the event refers to.
    pub fn entities(&self) -> impl Iterator<Item = &MoRef> {
        [&self.datacenter, &self.compute_resource, &self.host, &self.vm]
            .into_iter()
            .filter_map(|arg| arg.as_ref().and_then(|a| a.entity.as_ref()))
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventFilterSpecRecursionOption {
    #[serde(rename = "self")]
    OnlySelf,
    Children,
    #[default]
    All,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilterSpecByEntity {
    pub entity: MoRef,
    #[serde(default)]
    pub recursion: EventFilterSpecRecursionOption,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilterSpecByUsername {
    #[serde(default)]
    pub system_user: bool,
    #[serde(default)]
    pub user_list: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EventFilterSpecByEntity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_type_id: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<EventFilterSpecByUsername>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<i32>,
}
