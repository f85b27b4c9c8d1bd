// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SSO administration: person users, groups, identity sources, the
//! password policy and trusted certificates.
//!
//! Requests are authorized by the VIM session of the client the admin
//! client was made from, so log in there first.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use slog::debug;
use vim_api_types::ssoadmin::{
    CreateGroup, CreatePersonUser, Group, GroupDetails, GroupMembers,
    IdentitySources, PasswordPolicy, PersonDetails, PersonUser, PrincipalId,
    ResetPassword, TrustedCertificate,
};

use crate::{json, segment, vim25, Result};

#[derive(Clone)]
pub struct Client {
    vim: vim25::Client,
    url: String,
}

impl Client {
    pub fn new(vim: &vim25::Client) -> Self {
        Client { vim: vim.clone(), url: format!("{}/sso-adminserver", vim.url()) }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        debug!(self.vim.log(), "sso admin request"; "method" => %method, "path" => path);
        self.vim.authorize(self.vim.http().request(method, format!("{}{path}", self.url)))
    }

    async fn get<R: DeserializeOwned>(&self, path: &str, search: Option<&str>) -> Result<R> {
        let mut request = self.request(Method::GET, path);
        if let Some(search) = search {
            request = request.query(&[("search", search)]);
        }
        json(request.send().await?).await
    }

    async fn send<A, R>(&self, method: Method, path: &str, action: Option<&str>, body: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.request(method, path).json(body);
        if let Some(action) = action {
            request = request.query(&[("action", action)]);
        }
        json(request.send().await?).await
    }

    pub async fn identity_sources(&self) -> Result<IdentitySources> {
        self.get("/identity-sources", None).await
    }

    /// Person users whose name contains `search`.
    pub async fn find_users(&self, search: &str) -> Result<Vec<PersonUser>> {
        self.get("/users", Some(search)).await
    }

    pub async fn users(&self) -> Result<Vec<PersonUser>> {
        self.get("/users", None).await
    }

    /// A user by `name` or `name@domain`.
    pub async fn user(&self, name: &str) -> Result<PersonUser> {
        self.get(&format!("/users/{}", segment(name)), None).await
    }

    /// Creates a user in the system domain. The password must satisfy the
    /// password policy.
    pub async fn create_user(
        &self,
        name: &str,
        details: PersonDetails,
        password: &str,
    ) -> Result<PersonUser> {
        let body = CreatePersonUser {
            name: name.to_string(),
            details,
            password: password.to_string(),
        };
        self.send(Method::POST, "/users", None, &body).await
    }

    pub async fn update_user(&self, name: &str, details: PersonDetails) -> Result<PersonUser> {
        self.send(Method::PUT, &format!("/users/{}", segment(name)), None, &details).await
    }

    pub async fn delete_user(&self, name: &str) -> Result<()> {
        json(self.request(Method::DELETE, &format!("/users/{}", segment(name))).send().await?)
            .await
    }

    async fn user_action<A: Serialize + ?Sized>(&self, name: &str, action: &str, body: &A) -> Result<()> {
        self.send(Method::POST, &format!("/users/{}", segment(name)), Some(action), body).await
    }

    pub async fn reset_password(&self, name: &str, password: &str) -> Result<()> {
        let body = ResetPassword { password: password.to_string() };
        self.user_action(name, "reset-password", &body).await
    }

    pub async fn disable_user(&self, name: &str) -> Result<()> {
        self.user_action(name, "disable", &serde_json::json!({})).await
    }

    pub async fn enable_user(&self, name: &str) -> Result<()> {
        self.user_action(name, "enable", &serde_json::json!({})).await
    }

    pub async fn unlock_user(&self, name: &str) -> Result<()> {
        self.user_action(name, "unlock", &serde_json::json!({})).await
    }

    pub async fn find_groups(&self, search: &str) -> Result<Vec<Group>> {
        self.get("/groups", Some(search)).await
    }

    pub async fn group(&self, name: &str) -> Result<Group> {
        self.get(&format!("/groups/{}", segment(name)), None).await
    }

    pub async fn create_group(&self, name: &str, description: Option<&str>) -> Result<Group> {
        let body = CreateGroup {
            name: name.to_string(),
            details: GroupDetails { description: description.map(str::to_string) },
        };
        self.send(Method::POST, "/groups", None, &body).await
    }

    pub async fn delete_group(&self, name: &str) -> Result<()> {
        json(self.request(Method::DELETE, &format!("/groups/{}", segment(name))).send().await?)
            .await
    }

    pub async fn group_members(&self, name: &str) -> Result<Vec<PrincipalId>> {
        self.get(&format!("/groups/{}/members", segment(name)), None).await
    }

    pub async fn add_users_to_group(&self, group: &str, users: &[&str]) -> Result<()> {
        self.update_members(group, "add", users).await
    }

    pub async fn remove_users_from_group(&self, group: &str, users: &[&str]) -> Result<()> {
        self.update_members(group, "remove", users).await
    }

    async fn update_members(&self, group: &str, action: &str, users: &[&str]) -> Result<()> {
        let body = GroupMembers { users: users.iter().map(|u| PrincipalId::parse(u)).collect() };
        self.send(Method::POST, &format!("/groups/{}/members", segment(group)), Some(action), &body)
            .await
    }

    pub async fn password_policy(&self) -> Result<PasswordPolicy> {
        self.get("/password-policy", None).await
    }

    pub async fn set_password_policy(&self, policy: &PasswordPolicy) -> Result<()> {
        self.send(Method::PUT, "/password-policy", None, policy).await
    }

    pub async fn trusted_certificates(&self) -> Result<Vec<TrustedCertificate>> {
        self.get("/trusted-certificates", None).await
    }

    /// Adds a PEM encoded certificate to the trusted set.
    pub async fn add_trusted_certificate(&self, pem: &str) -> Result<()> {
        let body = TrustedCertificate { certificate: pem.to_string() };
        self.send(Method::POST, "/trusted-certificates", None, &body).await
    }
}
