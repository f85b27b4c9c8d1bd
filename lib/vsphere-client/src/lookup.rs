// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The lookup service, which tells clients where the other services of a
//! vCenter live.

use reqwest::Method;
use slog::debug;
use vim_api_types::lookup::{
    EndpointType, ListRequest, RegistrationFilter, RegistrationInfo,
    ServiceType,
};

use crate::{json, vim25, Error, Result};

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    url: String,
    log: slog::Logger,
}

impl Client {
    pub fn new(vim: &vim25::Client) -> Self {
        Client {
            http: vim.http().clone(),
            url: format!("{}/lookupservice", vim.url()),
            log: vim.log().clone(),
        }
    }

    /// Registrations matching `filter`. Endpoints of a type other than
    /// `filter.endpoint_type` are left out.
    pub async fn list(&self, filter: RegistrationFilter) -> Result<Vec<RegistrationInfo>> {
        debug!(self.log, "lookup"; "filter" => ?filter);
        let request = self
            .http
            .request(Method::POST, format!("{}/registration", self.url))
            .query(&[("action", "list")])
            .json(&ListRequest { filter_criteria: Some(filter) });
        json(request.send().await?).await
    }

    pub async fn site_id(&self) -> Result<String> {
        json(self.http.get(format!("{}/site-id", self.url)).send().await?).await
    }

    /// URL of the first endpoint registered for the given service and
    /// endpoint types.
    pub async fn endpoint_url(
        &self,
        service_type: ServiceType,
        endpoint_type: EndpointType,
    ) -> Result<String> {
        let path = format!("{}/{}", service_type.product, service_type.kind);
        let filter = RegistrationFilter {
            service_type: Some(service_type),
            endpoint_type: Some(endpoint_type),
            ..Default::default()
        };
        first_url(&self.list(filter).await?)
            .ok_or(Error::NotFound { kind: "service endpoint", path })
    }

    /// The SSO admin endpoint.
    pub async fn sso_admin_url(&self) -> Result<String> {
        self.endpoint_url(
            ServiceType { product: "com.vmware.cis".into(), kind: "cs.identity".into() },
            EndpointType {
                protocol: "vmomi".into(),
                kind: "com.vmware.cis.cs.identity.admin".into(),
            },
        )
        .await
    }

    /// The STS endpoint.
    pub async fn sts_url(&self) -> Result<String> {
        self.endpoint_url(
            ServiceType { product: "com.vmware.cis".into(), kind: "cs.identity".into() },
            EndpointType {
                protocol: "wsTrust".into(),
                kind: "com.vmware.cis.cs.identity.sso".into(),
            },
        )
        .await
    }
}

fn first_url(infos: &[RegistrationInfo]) -> Option<String> {
    infos
        .iter()
        .flat_map(|info| info.service_endpoints.iter())
        .map(|endpoint| endpoint.url.clone())
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vim_api_types::lookup::Endpoint;

    fn info(urls: &[&str]) -> RegistrationInfo {
        RegistrationInfo {
            service_version: "2.0".into(),
            owner_id: "owner".into(),
            service_type: ServiceType { product: "p".into(), kind: "k".into() },
            node_id: String::new(),
            service_id: "id".into(),
            site_id: "site".into(),
            service_endpoints: urls
                .iter()
                .map(|url| Endpoint {
                    url: url.to_string(),
                    endpoint_type: EndpointType { protocol: "p".into(), kind: "k".into() },
                    ssl_trust: Vec::new(),
                    endpoint_attributes: Vec::new(),
                })
                .collect(),
            service_attributes: Vec::new(),
        }
    }

    #[test]
    fn first_endpoint_wins() {
        assert_eq!(first_url(&[]), None);
        let infos = [info(&[]), info(&["https://a/sdk", "https://b/sdk"])];
        assert_eq!(first_url(&infos).as_deref(), Some("https://a/sdk"));
    }
}
