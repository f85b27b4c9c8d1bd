// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The SSO admin service under `/sso-adminserver`.
//!
//! Callers authenticate with a VIM session key. Only the trusted
//! certificate list may be read anonymously.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dropshot::{
    endpoint, ClientErrorStatusCode, HttpError, HttpResponseCreated,
    HttpResponseDeleted, HttpResponseOk, HttpResponseUpdatedNoContent, Path,
    Query, RequestContext, TypedBody, UntypedBody,
};
use schemars::JsonSchema;
use serde::Deserialize;
use slog::info;
use thiserror::Error;
use tokio::sync::MutexGuard;
use vim_api_types::ssoadmin::{
    faults, CreateGroup, CreatePersonUser, Domain, Group, GroupDetails,
    GroupMembers,
    IdentitySource, IdentitySources, LdapIdentitySource,
    LdapIdentitySourceDetails, PasswordFormat, PasswordPolicy, PersonDetails,
    PersonUser, PrincipalId, ResetPassword, SearchQuery, TrustedCertificate,
    SYSTEM_DOMAIN,
};
use vim_api_types::vapi::ActionQuery;

use crate::inventory::Inventory;
use crate::Context;

const ADMINISTRATOR: &str = "Administrator";
const ADMINISTRATORS: &str = "Administrators";
const PEM_HEADER: &str = "-----BEGIN CERTIFICATE-----";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("no such principal: {0}")]
    NotFound(String),
    #[error("principal already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid principal: {0}")]
    InvalidPrincipal(String),
    #[error("password policy violation: {0}")]
    PasswordPolicy(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<Error> for HttpError {
    fn from(e: Error) -> Self {
        let message = e.to_string();
        let (code, status) = match e {
            Error::NotAuthenticated => {
                (faults::NOT_AUTHENTICATED, ClientErrorStatusCode::UNAUTHORIZED)
            }
            Error::NotFound(_) => {
                (faults::NO_SUCH_PRINCIPAL, ClientErrorStatusCode::NOT_FOUND)
            }
            Error::AlreadyExists(_) => {
                (faults::DUPLICATE_PRINCIPAL, ClientErrorStatusCode::BAD_REQUEST)
            }
            Error::InvalidPrincipal(_) => {
                (faults::INVALID_PRINCIPAL, ClientErrorStatusCode::BAD_REQUEST)
            }
            Error::PasswordPolicy(_) => (
                faults::PASSWORD_POLICY_VIOLATION,
                ClientErrorStatusCode::BAD_REQUEST,
            ),
            Error::InvalidArgument(_) => {
                (faults::INVALID_ARGUMENT, ClientErrorStatusCode::BAD_REQUEST)
            }
        };
        HttpError::for_client_error(Some(code.to_string()), status, message)
    }
}

pub type SsoResult<T> = std::result::Result<T, Error>;

struct Person {
    user: PersonUser,
    password: String,
}

struct Members {
    group: Group,
    users: BTreeSet<PrincipalId>,
}

/// Principals and policies of the system domain.
pub struct Directory {
    users: BTreeMap<PrincipalId, Person>,
    groups: BTreeMap<PrincipalId, Members>,
    policy: PasswordPolicy,
    certificates: Vec<String>,
}

impl Default for Directory {
    fn default() -> Self {
        let admin = PrincipalId::parse(ADMINISTRATOR);
        let group = PrincipalId::parse(ADMINISTRATORS);
        let mut directory = Directory {
            users: BTreeMap::new(),
            groups: BTreeMap::new(),
            policy: PasswordPolicy::default(),
            certificates: Vec::new(),
        };
        directory.users.insert(
            admin.clone(),
            Person {
                user: PersonUser {
                    id: admin.clone(),
                    details: PersonDetails {
                        description: Some("Administrator".to_string()),
                        user_principal_name: Some(admin.to_string()),
                        ..Default::default()
                    },
                    disabled: false,
                    locked: false,
                },
                password: "Admin!23".to_string(),
            },
        );
        directory.groups.insert(
            group.clone(),
            Members {
                group: Group {
                    id: group,
                    details: GroupDetails {
                        description: Some("Administrators of the system domain".to_string()),
                    },
                },
                users: BTreeSet::from([admin]),
            },
        );
        directory
    }
}

/// The identity sources known to the server: the system domain, the local
/// OS and one LDAP directory.
pub fn identity_sources() -> IdentitySources {
    let system = IdentitySource {
        name: SYSTEM_DOMAIN.to_string(),
        domains: vec![Domain { name: SYSTEM_DOMAIN.to_string(), alias: "vmwarem".to_string() }],
    };
    let local_os = IdentitySource {
        name: "localos".to_string(),
        domains: vec![Domain { name: "localos".to_string(), alias: String::new() }],
    };
    let ldap = LdapIdentitySource {
        source: IdentitySource {
            name: "example.com".to_string(),
            domains: vec![Domain {
                name: "example.com".to_string(),
                alias: "examplex".to_string(),
            }],
        },
        kind: "ActiveDirectory".to_string(),
        details: LdapIdentitySourceDetails {
            friendly_name: "foo".to_string(),
            user_base_dn: "ou=People,dc=example,dc=org".to_string(),
            group_base_dn: "ou=People,dc=example,dc=org".to_string(),
            primary_url: "ldap://10.168.194.120:389".to_string(),
            failover_url: String::new(),
        },
        authentication_type: "PASSWORD".to_string(),
        username: "cn=admin,dc=example,dc=org".to_string(),
    };
    IdentitySources {
        all: vec![system.clone(), local_os.clone(), ldap.source.clone()],
        system,
        local_os: Some(local_os),
        ldaps: vec![ldap],
    }
}

/// Checks `password` against `format`, describing the first violation.
fn check_password(format: &PasswordFormat, password: &str) -> std::result::Result<(), String> {
    let count = |f: fn(&char) -> bool| password.chars().filter(f).count() as i32;
    let len = password.chars().count() as i32;
    if len < format.min_length || len > format.max_length {
        return Err(format!(
            "length must be between {} and {}",
            format.min_length, format.max_length
        ));
    }
    let rules: [(i32, i32, &str); 5] = [
        (count(char::is_ascii_alphabetic), format.min_alphabetic_count, "alphabetic"),
        (count(char::is_ascii_uppercase), format.min_uppercase_count, "uppercase"),
        (count(char::is_ascii_lowercase), format.min_lowercase_count, "lowercase"),
        (count(char::is_ascii_digit), format.min_numeric_count, "numeric"),
        (count(|c| !c.is_ascii_alphanumeric()), format.min_special_char_count, "special"),
    ];
    for (found, min, what) in rules {
        if found < min {
            return Err(format!("at least {min} {what} characters required"));
        }
    }
    let mut run = 0;
    let mut previous = None;
    for c in password.chars() {
        run = if previous == Some(c) { run + 1 } else { 1 };
        if run > format.max_identical_adjacent_characters {
            return Err(format!(
                "at most {} identical adjacent characters allowed",
                format.max_identical_adjacent_characters
            ));
        }
        previous = Some(c);
    }
    Ok(())
}

fn matches(id: &PrincipalId, search: Option<&str>) -> bool {
    search.map_or(true, |s| id.name.to_lowercase().contains(&s.to_lowercase()))
}

impl Directory {
    fn principal(&self, name: &str) -> SsoResult<PrincipalId> {
        let id = PrincipalId::parse(name);
        if id.name.is_empty() {
            return Err(Error::InvalidPrincipal(name.to_string()));
        }
        Ok(id)
    }

    fn new_principal(&self, name: &str) -> SsoResult<PrincipalId> {
        let id = self.principal(name)?;
        if id.domain != SYSTEM_DOMAIN {
            return Err(Error::InvalidPrincipal(name.to_string()));
        }
        if self.users.contains_key(&id) || self.groups.contains_key(&id) {
            return Err(Error::AlreadyExists(id.to_string()));
        }
        Ok(id)
    }

    fn person(&mut self, name: &str) -> SsoResult<&mut Person> {
        let id = self.principal(name)?;
        self.users.get_mut(&id).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn members(&mut self, name: &str) -> SsoResult<&mut Members> {
        let id = self.principal(name)?;
        self.groups.get_mut(&id).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn find_users(&self, search: Option<&str>) -> Vec<PersonUser> {
        self.users
            .values()
            .filter(|p| matches(&p.user.id, search))
            .map(|p| p.user.clone())
            .collect()
    }

    pub fn user(&mut self, name: &str) -> SsoResult<PersonUser> {
        Ok(self.person(name)?.user.clone())
    }

    pub fn create_user(&mut self, spec: CreatePersonUser) -> SsoResult<PersonUser> {
        let id = self.new_principal(&spec.name)?;
        check_password(&self.policy.password_format, &spec.password)
            .map_err(Error::PasswordPolicy)?;
        let user = PersonUser { id: id.clone(), details: spec.details, disabled: false, locked: false };
        self.users.insert(id, Person { user: user.clone(), password: spec.password });
        Ok(user)
    }

    pub fn update_user(&mut self, name: &str, details: PersonDetails) -> SsoResult<PersonUser> {
        let person = self.person(name)?;
        person.user.details = details;
        Ok(person.user.clone())
    }

    /// Deletes a user together with its group memberships.
    pub fn delete_user(&mut self, name: &str) -> SsoResult<()> {
        let id = self.principal(name)?;
        self.users.remove(&id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        for group in self.groups.values_mut() {
            group.users.remove(&id);
        }
        Ok(())
    }

    pub fn reset_password(&mut self, name: &str, password: String) -> SsoResult<()> {
        check_password(&self.policy.password_format, &password)
            .map_err(Error::PasswordPolicy)?;
        let reuse_forbidden = self.policy.prohibited_previous_passwords_count > 0;
        let person = self.person(name)?;
        if reuse_forbidden && person.password == password {
            return Err(Error::PasswordPolicy("password was used before".into()));
        }
        person.password = password;
        person.user.locked = false;
        Ok(())
    }

    pub fn set_disabled(&mut self, name: &str, disabled: bool) -> SsoResult<()> {
        self.person(name)?.user.disabled = disabled;
        Ok(())
    }

    pub fn unlock(&mut self, name: &str) -> SsoResult<()> {
        self.person(name)?.user.locked = false;
        Ok(())
    }

    pub fn find_groups(&self, search: Option<&str>) -> Vec<Group> {
        self.groups
            .values()
            .filter(|g| matches(&g.group.id, search))
            .map(|g| g.group.clone())
            .collect()
    }

    pub fn group(&mut self, name: &str) -> SsoResult<Group> {
        Ok(self.members(name)?.group.clone())
    }

    pub fn create_group(&mut self, spec: CreateGroup) -> SsoResult<Group> {
        let id = self.new_principal(&spec.name)?;
        let group = Group { id: id.clone(), details: spec.details };
        self.groups
            .insert(id, Members { group: group.clone(), users: BTreeSet::new() });
        Ok(group)
    }

    pub fn delete_group(&mut self, name: &str) -> SsoResult<()> {
        let id = self.principal(name)?;
        self.groups
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn group_members(&mut self, name: &str) -> SsoResult<Vec<PrincipalId>> {
        Ok(self.members(name)?.users.iter().cloned().collect())
    }

    /// Adds users to a group. Nothing changes if any user is unknown.
    pub fn add_members(&mut self, name: &str, users: Vec<PrincipalId>) -> SsoResult<()> {
        if let Some(unknown) = users.iter().find(|u| !self.users.contains_key(u)) {
            return Err(Error::NotFound(unknown.to_string()));
        }
        self.members(name)?.users.extend(users);
        Ok(())
    }

    pub fn remove_members(&mut self, name: &str, users: &[PrincipalId]) -> SsoResult<()> {
        let group = self.members(name)?;
        for user in users {
            group.users.remove(user);
        }
        Ok(())
    }

    pub fn policy(&self) -> PasswordPolicy {
        self.policy.clone()
    }

    pub fn set_policy(&mut self, policy: PasswordPolicy) -> SsoResult<()> {
        let format = &policy.password_format;
        if format.min_length < 1 || format.min_length > format.max_length {
            return Err(Error::InvalidArgument("passwordFormat.minLength".into()));
        }
        self.policy = policy;
        Ok(())
    }

    pub fn certificates(&self) -> Vec<TrustedCertificate> {
        self.certificates
            .iter()
            .map(|c| TrustedCertificate { certificate: c.clone() })
            .collect()
    }

    pub fn add_certificate(&mut self, certificate: String) -> SsoResult<()> {
        if !certificate.trim_start().starts_with(PEM_HEADER) {
            return Err(Error::InvalidArgument("certificate".into()));
        }
        if !self.certificates.contains(&certificate) {
            self.certificates.push(certificate);
        }
        Ok(())
    }
}

/// Locks the inventory on behalf of the request's VIM session.
async fn authorize(
    rqctx: &RequestContext<Arc<Context>>,
) -> std::result::Result<MutexGuard<'_, Inventory>, HttpError> {
    let ctx = rqctx.context();
    if !ctx.is_vcenter() {
        return Err(HttpError::for_not_found(None, "SSO admin service".to_string()));
    }
    let token = crate::vim::session_header(rqctx);
    let mut inv = ctx.inventory.lock().await;
    match token {
        Some(token) if inv.sessions.touch(&token) => Ok(inv),
        _ => Err(Error::NotAuthenticated.into()),
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct PrincipalPath {
    name: String,
}

#[endpoint {
    method = GET,
    path = "/sso-adminserver/identity-sources",
}]
pub async fn identity_source_list(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<IdentitySources>, HttpError> {
    let _inv = authorize(&rqctx).await?;
    Ok(HttpResponseOk(identity_sources()))
}

#[endpoint {
    method = GET,
    path = "/sso-adminserver/users",
}]
pub async fn user_list(
    rqctx: RequestContext<Arc<Context>>,
    query: Query<SearchQuery>,
) -> std::result::Result<HttpResponseOk<Vec<PersonUser>>, HttpError> {
    let inv = authorize(&rqctx).await?;
    let query = query.into_inner();
    Ok(HttpResponseOk(inv.sso.find_users(query.search.as_deref())))
}

#[endpoint {
    method = POST,
    path = "/sso-adminserver/users",
}]
pub async fn user_create(
    rqctx: RequestContext<Arc<Context>>,
    body: TypedBody<CreatePersonUser>,
) -> std::result::Result<HttpResponseCreated<PersonUser>, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    let user = inv.sso.create_user(body.into_inner())?;
    info!(rqctx.log, "person user created"; "user" => %user.id);
    Ok(HttpResponseCreated(user))
}

#[endpoint {
    method = GET,
    path = "/sso-adminserver/users/{name}",
}]
pub async fn user_get(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<PrincipalPath>,
) -> std::result::Result<HttpResponseOk<PersonUser>, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    Ok(HttpResponseOk(inv.sso.user(&path.into_inner().name)?))
}

#[endpoint {
    method = PUT,
    path = "/sso-adminserver/users/{name}",
}]
pub async fn user_update(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<PrincipalPath>,
    body: TypedBody<PersonDetails>,
) -> std::result::Result<HttpResponseOk<PersonUser>, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    let user = inv.sso.update_user(&path.into_inner().name, body.into_inner())?;
    Ok(HttpResponseOk(user))
}

#[endpoint {
    method = DELETE,
    path = "/sso-adminserver/users/{name}",
}]
pub async fn user_delete(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<PrincipalPath>,
) -> std::result::Result<HttpResponseDeleted, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    inv.sso.delete_user(&path.into_inner().name)?;
    Ok(HttpResponseDeleted())
}

/// `action=reset-password|disable|enable|unlock`.
#[endpoint {
    method = POST,
    path = "/sso-adminserver/users/{name}",
}]
pub async fn user_action(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<PrincipalPath>,
    query: Query<ActionQuery>,
    body: UntypedBody,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    let name = path.into_inner().name;
    match query.into_inner().action.as_deref().unwrap_or("") {
        "reset-password" => {
            let req: ResetPassword = serde_json::from_slice(body.as_bytes())
                .map_err(|e| Error::InvalidArgument(e.to_string()))?;
            inv.sso.reset_password(&name, req.password)?;
        }
        "disable" => inv.sso.set_disabled(&name, true)?,
        "enable" => inv.sso.set_disabled(&name, false)?,
        "unlock" => inv.sso.unlock(&name)?,
        other => return Err(Error::InvalidArgument(format!("action {other:?}")).into()),
    }
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = GET,
    path = "/sso-adminserver/groups",
}]
pub async fn group_list(
    rqctx: RequestContext<Arc<Context>>,
    query: Query<SearchQuery>,
) -> std::result::Result<HttpResponseOk<Vec<Group>>, HttpError> {
    let inv = authorize(&rqctx).await?;
    let query = query.into_inner();
    Ok(HttpResponseOk(inv.sso.find_groups(query.search.as_deref())))
}

#[endpoint {
    method = POST,
    path = "/sso-adminserver/groups",
}]
pub async fn group_create(
    rqctx: RequestContext<Arc<Context>>,
    body: TypedBody<CreateGroup>,
) -> std::result::Result<HttpResponseCreated<Group>, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    Ok(HttpResponseCreated(inv.sso.create_group(body.into_inner())?))
}

#[endpoint {
    method = GET,
    path = "/sso-adminserver/groups/{name}",
}]
pub async fn group_get(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<PrincipalPath>,
) -> std::result::Result<HttpResponseOk<Group>, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    Ok(HttpResponseOk(inv.sso.group(&path.into_inner().name)?))
}

#[endpoint {
    method = DELETE,
    path = "/sso-adminserver/groups/{name}",
}]
pub async fn group_delete(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<PrincipalPath>,
) -> std::result::Result<HttpResponseDeleted, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    inv.sso.delete_group(&path.into_inner().name)?;
    Ok(HttpResponseDeleted())
}

#[endpoint {
    method = GET,
    path = "/sso-adminserver/groups/{name}/members",
}]
pub async fn group_members(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<PrincipalPath>,
) -> std::result::Result<HttpResponseOk<Vec<PrincipalId>>, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    Ok(HttpResponseOk(inv.sso.group_members(&path.into_inner().name)?))
}

/// `action=add|remove` of the listed users.
#[endpoint {
    method = POST,
    path = "/sso-adminserver/groups/{name}/members",
}]
pub async fn group_update_members(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<PrincipalPath>,
    query: Query<ActionQuery>,
    body: TypedBody<GroupMembers>,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    let name = path.into_inner().name;
    let users = body.into_inner().users;
    match query.into_inner().action.as_deref().unwrap_or("") {
        "add" => inv.sso.add_members(&name, users)?,
        "remove" => inv.sso.remove_members(&name, &users)?,
        other => return Err(Error::InvalidArgument(format!("action {other:?}")).into()),
    }
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = GET,
    path = "/sso-adminserver/password-policy",
}]
pub async fn password_policy_get(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<PasswordPolicy>, HttpError> {
    let inv = authorize(&rqctx).await?;
    Ok(HttpResponseOk(inv.sso.policy()))
}

#[endpoint {
    method = PUT,
    path = "/sso-adminserver/password-policy",
}]
pub async fn password_policy_update(
    rqctx: RequestContext<Arc<Context>>,
    body: TypedBody<PasswordPolicy>,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    inv.sso.set_policy(body.into_inner())?;
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = GET,
    path = "/sso-adminserver/trusted-certificates",
}]
pub async fn certificate_list(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<Vec<TrustedCertificate>>, HttpError> {
    let ctx = rqctx.context();
    if !ctx.is_vcenter() {
        return Err(HttpError::for_not_found(None, "SSO admin service".to_string()));
    }
    let inv = ctx.inventory.lock().await;
    Ok(HttpResponseOk(inv.sso.certificates()))
}

#[endpoint {
    method = POST,
    path = "/sso-adminserver/trusted-certificates",
}]
pub async fn certificate_add(
    rqctx: RequestContext<Arc<Context>>,
    body: TypedBody<TrustedCertificate>,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut inv = authorize(&rqctx).await?;
    inv.sso.add_certificate(body.into_inner().certificate)?;
    Ok(HttpResponseUpdatedNoContent())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str, password: &str) -> CreatePersonUser {
        CreatePersonUser {
            name: name.into(),
            details: PersonDetails::default(),
            password: password.into(),
        }
    }

    #[test]
    fn seeded_administrator() {
        let mut dir = Directory::default();
        let admin = dir.user("Administrator@vsphere.local").unwrap();
        assert_eq!(admin.id.to_string(), "Administrator@vsphere.local");
        assert_eq!(dir.group_members("Administrators").unwrap(), vec![admin.id]);
    }

    #[test]
    fn passwords_follow_policy() {
        let format = PasswordPolicy::default().password_format;
        assert!(check_password(&format, "Passw0rd!").is_ok());
        assert!(check_password(&format, "short").is_err());
        assert!(check_password(&format, "password0!").is_err());
        assert!(check_password(&format, "Password!!").is_err());
        assert!(check_password(&format, "Paaaass0rd!").is_err());
    }

    #[test]
    fn user_lifecycle() {
        let mut dir = Directory::default();
        assert!(matches!(
            dir.create_user(person("alice", "weak")),
            Err(Error::PasswordPolicy(_))
        ));
        let alice = dir.create_user(person("alice", "Passw0rd!")).unwrap();
        assert_eq!(alice.id, PrincipalId::parse("alice@vsphere.local"));
        assert!(matches!(
            dir.create_user(person("alice@vsphere.local", "Passw0rd!")),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            dir.create_user(person("bob@example.com", "Passw0rd!")),
            Err(Error::InvalidPrincipal(_))
        ));

        assert_eq!(dir.find_users(Some("ALI")).len(), 1);
        assert_eq!(dir.find_users(None).len(), 2);

        let details = PersonDetails { email_address: Some("alice@example.com".into()), ..Default::default() };
        let updated = dir.update_user("alice", details).unwrap();
        assert_eq!(updated.details.email_address.as_deref(), Some("alice@example.com"));

        dir.set_disabled("alice", true).unwrap();
        assert!(dir.user("alice").unwrap().disabled);
        dir.reset_password("alice", "N3w-Passw0rd".into()).unwrap();
        assert!(matches!(
            dir.reset_password("alice", "N3w-Passw0rd".into()),
            Err(Error::PasswordPolicy(_))
        ));

        dir.add_members("Administrators", vec![alice.id.clone()]).unwrap();
        dir.delete_user("alice").unwrap();
        assert!(!dir.group_members("Administrators").unwrap().contains(&alice.id));
        assert!(matches!(dir.user("alice"), Err(Error::NotFound(_))));
    }

    #[test]
    fn groups() {
        let mut dir = Directory::default();
        let group = dir
            .create_group(CreateGroup { name: "ops".into(), details: GroupDetails::default() })
            .unwrap();
        assert_eq!(dir.find_groups(Some("op")), vec![group.clone()]);
        let ghost = PrincipalId::parse("ghost");
        assert!(matches!(dir.add_members("ops", vec![ghost]), Err(Error::NotFound(_))));
        assert!(dir.group_members("ops").unwrap().is_empty());

        let admin = PrincipalId::parse(ADMINISTRATOR);
        dir.add_members("ops", vec![admin.clone()]).unwrap();
        dir.remove_members("ops", &[admin]).unwrap();
        dir.delete_group("ops").unwrap();
        assert!(matches!(dir.group("ops"), Err(Error::NotFound(_))));
    }

    #[test]
    fn trusted_certificates() {
        let mut dir = Directory::default();
        let pem = format!("{PEM_HEADER}\nMIIB\n-----END CERTIFICATE-----\n");
        dir.add_certificate(pem.clone()).unwrap();
        dir.add_certificate(pem).unwrap();
        assert_eq!(dir.certificates().len(), 1);
        assert!(matches!(
            dir.add_certificate("bogus".into()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn identity_source_listing() {
        let sources = identity_sources();
        let names: Vec<_> = sources.all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["vsphere.local", "localos", "example.com"]);
        assert_eq!(sources.ldaps[0].kind, "ActiveDirectory");
    }
}
