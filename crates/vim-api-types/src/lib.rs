// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Definitions for types exchanged between vSphere clients and the simulator
//!
//! The VIM types use the lowerCamelCase member names of the VIM API, encoded
//! as VI/JSON. Polymorphic data objects carry their concrete type in a
//! `_typeName` member. The vAPI, lookup and SSO admin types live in their own
//! modules and follow the naming of those services.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod event;
pub mod fault;
pub mod lookup;
pub mod methods;
pub mod mo;
pub mod property;
pub mod session;
pub mod ssoadmin;
pub mod task;
pub mod vapi;
pub mod vm;

pub use fault::{LocalizedMethodFault, MethodFault};

/// Header carrying the session key on VIM and vAPI requests.
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// Release segment used in VI/JSON paths by default.
pub const API_RELEASE: &str = "8.0.1.0";

/// Identifies a server-side managed object.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct ManagedObjectReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

pub type MoRef = ManagedObjectReference;

impl ManagedObjectReference {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self { kind: kind.into(), value: value.into() }
    }
}

impl fmt::Display for ManagedObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("expected Type:value, got {0:?}")]
pub struct ParseReferenceError(pub String);

impl FromStr for ManagedObjectReference {
    type Err = ParseReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((kind, value)) if !kind.is_empty() && !value.is_empty() => {
                Ok(Self::new(kind, value))
            }
            _ => Err(ParseReferenceError(s.to_string())),
        }
    }
}

/// A key/value pair, used by option settings and VM extra configuration.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionValue {
    pub key: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl OptionValue {
    pub fn new(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Product identification reported in `ServiceContent.about`.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutInfo {
    pub name: String,
    pub full_name: String,
    pub vendor: String,
    pub version: String,
    pub build: String,
    pub os_type: String,
    pub product_line_id: String,
    pub api_type: String,
    pub api_version: String,
    pub instance_uuid: String,
    pub license_product_name: String,
    pub license_product_version: String,
}

/// Root of the VIM service, returned by `RetrieveServiceContent`.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContent {
    pub root_folder: MoRef,
    pub property_collector: MoRef,
    pub view_manager: Option<MoRef>,
    pub about: AboutInfo,
    pub setting: Option<MoRef>,
    pub session_manager: Option<MoRef>,
    pub search_index: Option<MoRef>,
    pub task_manager: Option<MoRef>,
    pub event_manager: Option<MoRef>,
}

impl ServiceContent {
    /// Returns true if the service is a vCenter rather than a single host.
    pub fn is_vcenter(&self) -> bool {
        self.about.api_type == "VirtualCenter"
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizableMessage {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_wire_format() {
        let r = MoRef::new("VirtualMachine", "vm-42");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "VirtualMachine", "value": "vm-42"})
        );
        assert_eq!(r.to_string(), "VirtualMachine:vm-42");
    }

    #[test]
    fn reference_parse() {
        let r: MoRef = "HostSystem:host-7".parse().unwrap();
        assert_eq!(r, MoRef::new("HostSystem", "host-7"));
        assert!("host-7".parse::<MoRef>().is_err());
        assert!(":x".parse::<MoRef>().is_err());
    }
}
