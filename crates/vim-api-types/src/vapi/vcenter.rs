// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    PoweredOff,
    PoweredOn,
    Suspended,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct VmSummary {
    pub vm: String,
    pub name: String,
    pub power_state: PowerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<i64>,
    #[serde(
        rename = "memory_size_MiB",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub memory_size_mib: Option<i64>,
}

/// Filter for listing virtual machines; `names` is a comma separated list.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
pub struct VmFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_states: Option<PowerState>,
}
