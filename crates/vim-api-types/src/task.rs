// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{LocalizableMessage, LocalizedMethodFault, MoRef};

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskInfoState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskInfoState {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskInfoState::Success | TaskInfoState::Error)
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReason {
    #[serde(rename = "_typeName")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl TaskReason {
    pub fn user(name: impl Into<String>) -> Self {
        Self { kind: "TaskReasonUser".into(), user_name: Some(name.into()) }
    }
}

/// State of a server-side task.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub key: String,
    pub task: MoRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub description_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<LocalizableMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<MoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    pub state: TaskInfoState,
    pub cancelled: bool,
    pub cancelable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LocalizedMethodFault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    pub reason: TaskReason,
    pub queue_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
    pub event_chain_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_id: Option<String>,
}
