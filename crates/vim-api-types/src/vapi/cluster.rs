// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster module service types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ModuleSummary {
    pub cluster: String,
    pub module: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ModuleSummaryList {
    pub summaries: Vec<ModuleSummary>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct CreateModuleSpec {
    pub cluster: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct CreateModule {
    pub spec: CreateModuleSpec,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ModuleMembers {
    pub vms: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ModuleMembersResult {
    pub success: bool,
}
