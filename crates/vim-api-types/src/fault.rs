// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VIM method faults.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MoRef;

/// Fault raised by a VIM method, tagged by its VIM type name.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Error,
    JsonSchema,
    PartialEq,
    Serialize,
    strum::IntoStaticStr,
)]
#[serde(tag = "_typeName")]
pub enum MethodFault {
    #[error("Cannot complete login due to an incorrect user name or password.")]
    InvalidLogin,

    #[error("The session is not authenticated.")]
    #[serde(rename_all = "camelCase")]
    NotAuthenticated { object: MoRef, privilege_id: String },

    #[error("The object '{obj}' has already been deleted or has not been completely created")]
    ManagedObjectNotFound { obj: MoRef },

    #[error("Method {method} not found on {receiver}")]
    MethodNotFound { receiver: MoRef, method: String },

    #[error("The method is disabled by '{}'", .by.as_deref().unwrap_or_default())]
    MethodDisabled {
        #[serde(rename = "source", default)]
        by: Option<String>,
    },

    #[error("A specified parameter was not correct: {}", .invalid_property.as_deref().unwrap_or_default())]
    #[serde(rename_all = "camelCase")]
    InvalidArgument {
        #[serde(default)]
        invalid_property: Option<String>,
    },

    #[error("The property '{name}' is invalid")]
    InvalidProperty { name: String },

    #[error("The operation is not allowed in the current state.")]
    InvalidState,

    #[error("The attempted operation cannot be performed in the current state ({existing_state}).")]
    #[serde(rename_all = "camelCase")]
    InvalidPowerState {
        #[serde(default)]
        requested_state: Option<String>,
        existing_state: String,
    },

    #[error("Name '{name}' is invalid")]
    InvalidName {
        name: String,
        #[serde(default)]
        entity: Option<MoRef>,
    },

    #[error("The name '{name}' already exists.")]
    DuplicateName { name: String, object: MoRef },

    #[error("The object or item referred to could not be found.")]
    NotFound,

    #[error("The operation is not supported on the object.")]
    NotSupported,

    #[error("The task was canceled by a user.")]
    RequestCanceled,

    #[error("The request is invalid: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid datastore path '{datastore_path}'")]
    #[serde(rename_all = "camelCase")]
    InvalidDatastorePath { datastore: String, datastore_path: String },

    #[error("The resource '{name}' is in use.")]
    ResourceInUse {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        name: String,
    },

    #[error("A general system error occurred: {reason}")]
    SystemError { reason: String },
}

impl MethodFault {
    /// Returns the VIM type name of this fault.
    pub fn type_name(&self) -> &'static str {
        self.into()
    }

    pub fn invalid_argument(property: impl Into<String>) -> Self {
        MethodFault::InvalidArgument { invalid_property: Some(property.into()) }
    }

    pub fn invalid_property(name: impl Into<String>) -> Self {
        MethodFault::InvalidProperty { name: name.into() }
    }

    pub fn invalid_power_state(
        requested: Option<&str>,
        existing: impl Into<String>,
    ) -> Self {
        MethodFault::InvalidPowerState {
            requested_state: requested.map(str::to_string),
            existing_state: existing.into(),
        }
    }

    pub fn not_found(obj: MoRef) -> Self {
        MethodFault::ManagedObjectNotFound { obj }
    }

    pub fn system_error(reason: impl Into<String>) -> Self {
        MethodFault::SystemError { reason: reason.into() }
    }
}

/// A fault together with its rendered message.
#[derive(Clone, Debug, Deserialize, Error, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{localized_message}")]
pub struct LocalizedMethodFault {
    pub fault: MethodFault,
    pub localized_message: String,
}

impl From<MethodFault> for LocalizedMethodFault {
    fn from(fault: MethodFault) -> Self {
        let localized_message = fault.to_string();
        LocalizedMethodFault { fault, localized_message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_is_tagged_by_type_name() {
        let fault = MethodFault::invalid_power_state(Some("poweredOn"), "poweredOn");
        let json = serde_json::to_value(&fault).unwrap();
        assert_eq!(json["_typeName"], "InvalidPowerState");
        assert_eq!(json["existingState"], "poweredOn");
        assert_eq!(fault.type_name(), "InvalidPowerState");

        let back: MethodFault = serde_json::from_value(json).unwrap();
        assert_eq!(back, fault);
    }

    #[test]
    fn unit_fault_parses() {
        let fault: MethodFault =
            serde_json::from_str(r#"{"_typeName":"InvalidLogin"}"#).unwrap();
        assert_eq!(fault, MethodFault::InvalidLogin);

        let localized = LocalizedMethodFault::from(fault);
        assert_eq!(
            localized.localized_message,
            "Cannot complete login due to an incorrect user name or password."
        );
    }

    #[test]
    fn method_disabled_source_member() {
        let fault = MethodFault::MethodDisabled { by: Some("vcsim".into()) };
        let json = serde_json::to_value(&fault).unwrap();
        assert_eq!(json["source"], "vcsim");
    }
}
