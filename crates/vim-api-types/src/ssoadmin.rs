// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SSO administration types.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The system domain of the simulated SSO server.
pub const SYSTEM_DOMAIN: &str = "vsphere.local";

/// Fault names reported as the `error_code` of SSO admin error bodies.
pub mod faults {
    pub const NOT_AUTHENTICATED: &str = "NotAuthenticated";
    pub const NO_SUCH_PRINCIPAL: &str = "SsoAdminFaultNoSuchPrincipalFault";
    pub const DUPLICATE_PRINCIPAL: &str = "SsoAdminFaultPrincipalAlreadyExistsFault";
    pub const INVALID_PRINCIPAL: &str = "SsoAdminFaultInvalidPrincipalFault";
    pub const PASSWORD_POLICY_VIOLATION: &str =
        "SsoAdminFaultPasswordPolicyViolationFault";
    pub const INVALID_ARGUMENT: &str = "InvalidArgument";
}

#[derive(
    Clone, Debug, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalId {
    pub name: String,
    pub domain: String,
}

impl PrincipalId {
    /// Parses `user@domain`, defaulting to the system domain.
    pub fn parse(name: &str) -> Self {
        match name.split_once('@') {
            Some((user, domain)) => {
                PrincipalId { name: user.to_string(), domain: domain.to_string() }
            }
            None => PrincipalId {
                name: name.to_string(),
                domain: SYSTEM_DOMAIN.to_string(),
            },
        }
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_principal_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonUser {
    pub id: PrincipalId,
    pub details: PersonDetails,
    pub disabled: bool,
    pub locked: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePersonUser {
    pub name: String,
    #[serde(default)]
    pub details: PersonDetails,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPassword {
    pub password: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: PrincipalId,
    pub details: GroupDetails,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroup {
    pub name: String,
    #[serde(default)]
    pub details: GroupDetails,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembers {
    #[serde(default)]
    pub users: Vec<PrincipalId>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub name: String,
    #[serde(default)]
    pub alias: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySource {
    pub name: String,
    pub domains: Vec<Domain>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapIdentitySourceDetails {
    pub friendly_name: String,
    pub user_base_dn: String,
    pub group_base_dn: String,
    pub primary_url: String,
    #[serde(default)]
    pub failover_url: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapIdentitySource {
    #[serde(flatten)]
    pub source: IdentitySource,
    #[serde(rename = "type")]
    pub kind: String,
    pub details: LdapIdentitySourceDetails,
    pub authentication_type: String,
    pub username: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySources {
    pub all: Vec<IdentitySource>,
    pub system: IdentitySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_os: Option<IdentitySource>,
    #[serde(default)]
    pub ldaps: Vec<LdapIdentitySource>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordFormat {
    pub max_length: i32,
    pub min_length: i32,
    pub min_alphabetic_count: i32,
    pub min_uppercase_count: i32,
    pub min_lowercase_count: i32,
    pub min_numeric_count: i32,
    pub min_special_char_count: i32,
    pub max_identical_adjacent_characters: i32,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordPolicy {
    #[serde(default)]
    pub description: String,
    pub prohibited_previous_passwords_count: i32,
    pub password_format: PasswordFormat,
    pub password_lifetime_days: i32,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        PasswordPolicy {
            description: String::new(),
            prohibited_previous_passwords_count: 5,
            password_format: PasswordFormat {
                max_length: 20,
                min_length: 8,
                min_alphabetic_count: 2,
                min_uppercase_count: 1,
                min_lowercase_count: 1,
                min_numeric_count: 1,
                min_special_char_count: 1,
                max_identical_adjacent_characters: 3,
            },
            password_lifetime_days: 90,
        }
    }
}

/// A PEM encoded certificate trusted by the SSO server.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedCertificate {
    pub certificate: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_parse() {
        let id = PrincipalId::parse("alice@example.com");
        assert_eq!(id.name, "alice");
        assert_eq!(id.domain, "example.com");
        assert_eq!(PrincipalId::parse("bob").to_string(), "bob@vsphere.local");
    }
}
