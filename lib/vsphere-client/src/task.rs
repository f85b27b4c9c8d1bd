// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::de::DeserializeOwned;
use vim_api_types::methods::{
    SetTaskDescriptionRequest, SetTaskStateRequest, UpdateProgressRequest,
};
use vim_api_types::task::{TaskInfo, TaskInfoState};
use vim_api_types::{
    LocalizableMessage, LocalizedMethodFault, MethodFault, MoRef,
};

use crate::{property, vim25, Error, Result};

/// A server-side task, as returned by the `*_Task` methods.
#[derive(Clone)]
pub struct Task {
    client: vim25::Client,
    this: MoRef,
}

impl Task {
    pub fn new(client: &vim25::Client, this: MoRef) -> Self {
        Task { client: client.clone(), this }
    }

    pub fn reference(&self) -> &MoRef {
        &self.this
    }

    pub async fn info(&self) -> Result<TaskInfo> {
        self.client.property(&self.this, "info").await
    }

    /// Waits for the task to complete, failing with its fault.
    pub async fn wait(&self) -> Result<()> {
        self.wait_for_result().await.map(drop)
    }

    /// Waits for the task to complete, returning its final info on success
    /// and its fault as an error otherwise.
    pub async fn wait_for_result(&self) -> Result<TaskInfo> {
        let mut last: Option<TaskInfo> = None;
        let collector = property::Collector::new(&self.client);
        property::wait(&collector, &self.this, &["info"], |changes| {
            let info = changes
                .iter()
                .filter(|c| c.name == "info")
                .filter_map(|c| c.val.clone())
                .filter_map(|v| serde_json::from_value::<TaskInfo>(v).ok())
                .last();
            match info {
                Some(info) if info.state.is_done() => {
                    last = Some(info);
                    true
                }
                _ => false,
            }
        })
        .await?;
        let info = last.ok_or_else(|| Error::NotFound {
            kind: "task",
            path: self.this.to_string(),
        })?;
        finished(info)
    }

    /// Waits for the task and decodes its result.
    pub async fn result<T: DeserializeOwned>(&self) -> Result<T> {
        let info = self.wait_for_result().await?;
        Ok(serde_json::from_value(info.result.unwrap_or_default())?)
    }

    pub async fn cancel(&self) -> Result<()> {
        self.client.call(&self.this, "CancelTask").await
    }

    /// Moves a task created with `TaskManager::create_task` to `state`.
    pub async fn set_state(
        &self,
        state: TaskInfoState,
        result: Option<serde_json::Value>,
        fault: Option<MethodFault>,
    ) -> Result<()> {
        let req = SetTaskStateRequest {
            state,
            result,
            fault: fault.map(LocalizedMethodFault::from),
        };
        self.client.invoke(&self.this, "SetTaskState", &req).await
    }

    pub async fn set_description(&self, description: LocalizableMessage) -> Result<()> {
        let req = SetTaskDescriptionRequest { description };
        self.client.invoke(&self.this, "SetTaskDescription", &req).await
    }

    pub async fn update_progress(&self, percent_done: i32) -> Result<()> {
        let req = UpdateProgressRequest { percent_done };
        self.client.invoke(&self.this, "UpdateProgress", &req).await
    }
}

fn finished(info: TaskInfo) -> Result<TaskInfo> {
    match info.state {
        TaskInfoState::Error => {
            let fault = info.error.unwrap_or_else(|| {
                LocalizedMethodFault::from(MethodFault::system_error(
                    "task failed without a fault",
                ))
            });
            Err(Error::Fault(Box::new(fault)))
        }
        _ => Ok(info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(state: &str, error: Option<MethodFault>) -> TaskInfo {
        let mut info = json!({
            "key": "task-7",
            "task": {"type": "Task", "value": "task-7"},
            "descriptionId": "VirtualMachine.powerOn",
            "state": state,
            "cancelled": false,
            "cancelable": false,
            "reason": {"_typeName": "TaskReasonUser", "userName": "user"},
            "queueTime": "2024-01-01T00:00:00Z",
            "eventChainId": 7,
        });
        if let Some(fault) = error {
            info["error"] = serde_json::to_value(LocalizedMethodFault::from(fault)).unwrap();
        }
        serde_json::from_value(info).unwrap()
    }

    #[test]
    fn faults_become_errors() {
        assert!(finished(info("success", None)).is_ok());

        let fault = MethodFault::invalid_power_state(Some("poweredOn"), "poweredOn");
        let err = finished(info("error", Some(fault.clone()))).unwrap_err();
        assert_eq!(err.fault(), Some(&fault));

        let err = finished(info("error", None)).unwrap_err();
        assert!(matches!(err.fault(), Some(MethodFault::SystemError { .. })));
    }
}
