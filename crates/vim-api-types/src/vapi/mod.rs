// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types of the vAPI REST services.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod cluster;
pub mod library;
pub mod tags;
pub mod vcenter;

/// vAPI standard error types, reported as the `error_code` of error bodies.
pub mod errors {
    pub const UNAUTHENTICATED: &str = "com.vmware.vapi.std.errors.unauthenticated";
    pub const NOT_FOUND: &str = "com.vmware.vapi.std.errors.not_found";
    pub const ALREADY_EXISTS: &str = "com.vmware.vapi.std.errors.already_exists";
    pub const INVALID_ARGUMENT: &str = "com.vmware.vapi.std.errors.invalid_argument";
    pub const NOT_ALLOWED_IN_CURRENT_STATE: &str =
        "com.vmware.vapi.std.errors.not_allowed_in_current_state";
    pub const UNSUPPORTED: &str = "com.vmware.vapi.std.errors.unsupported";
    pub const RESOURCE_INACCESSIBLE: &str =
        "com.vmware.vapi.std.errors.resource_inaccessible";
}

/// Information about the caller's vAPI session.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct SessionInfo {
    pub user: String,
    pub created_time: DateTime<Utc>,
    pub last_accessed_time: DateTime<Utc>,
}

/// Query selecting a vAPI action on a resource.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
pub struct ActionQuery {
    #[serde(default)]
    pub action: Option<String>,
}
