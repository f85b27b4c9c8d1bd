// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lookup service registration types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Site id reported by the simulator's lookup service.
pub const SITE_ID: &str = "vcsim";

/// Fault type returned for an unfiltered registration listing.
pub const SERVICE_FAULT: &str = "LookupFaultServiceFault";

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceType {
    #[serde(default)]
    pub product: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl ServiceType {
    /// Returns true if every non-empty member of `self` equals `other`'s.
    pub fn matches(&self, other: &ServiceType) -> bool {
        (self.product.is_empty() || self.product == other.product)
            && (self.kind.is_empty() || self.kind == other.kind)
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointType {
    #[serde(default)]
    pub protocol: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl EndpointType {
    pub fn matches(&self, other: &EndpointType) -> bool {
        (self.protocol.is_empty() || self.protocol == other.protocol)
            && (self.kind.is_empty() || self.kind == other.kind)
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub url: String,
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub ssl_trust: Vec<String>,
    #[serde(default)]
    pub endpoint_attributes: Vec<Attribute>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInfo {
    pub service_version: String,
    pub owner_id: String,
    pub service_type: ServiceType,
    pub node_id: String,
    pub service_id: String,
    pub site_id: String,
    #[serde(default)]
    pub service_endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub service_attributes: Vec<Attribute>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_type: Option<EndpointType>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_criteria: Option<RegistrationFilter>,
}
