// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use reqwest::Method;
use vim_api_types::vapi::vcenter::{PowerState, VmFilter, VmSummary};

use super::Client;
use crate::{json, Result};

#[derive(Clone)]
pub struct Manager {
    client: Client,
}

impl Manager {
    pub fn new(client: &Client) -> Self {
        Manager { client: client.clone() }
    }

    /// Summaries of the VMs matching `filter`; an empty filter lists every
    /// VM.
    pub async fn list_vms(&self, filter: &VmFilter) -> Result<Vec<VmSummary>> {
        let request = self.client.request(Method::GET, "/api/vcenter/vm").query(filter);
        json(request.send().await?).await
    }

    pub async fn vms_named(&self, names: &[&str]) -> Result<Vec<VmSummary>> {
        let filter = VmFilter { names: Some(names.join(",")), power_states: None };
        self.list_vms(&filter).await
    }

    pub async fn vms_in_state(&self, state: PowerState) -> Result<Vec<VmSummary>> {
        let filter = VmFilter { names: None, power_states: Some(state) };
        self.list_vms(&filter).await
    }
}
