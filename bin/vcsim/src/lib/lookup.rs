// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The lookup service under `/lookupservice`, listing the endpoints of the
//! simulated SSO, VIM and vAPI services.

use std::sync::Arc;

use dropshot::{
    endpoint, HttpError, HttpResponseOk, Query, RequestContext, TypedBody,
};
use vim_api_types::lookup::{
    Attribute, Endpoint, EndpointType, ListRequest, RegistrationFilter,
    RegistrationInfo, ServiceType, SERVICE_FAULT, SITE_ID,
};
use vim_api_types::vapi::ActionQuery;

use crate::vim::option::Settings;
use crate::Context;

const LOOKUP_VERSION: &str = "2.0";

fn attribute(key: &str, value: &str) -> Attribute {
    Attribute { key: key.to_string(), value: value.to_string() }
}

fn endpoint(url: String, protocol: &str, kind: &str) -> Endpoint {
    Endpoint {
        url,
        endpoint_type: EndpointType { protocol: protocol.to_string(), kind: kind.to_string() },
        ssl_trust: Vec::new(),
        endpoint_attributes: Vec::new(),
    }
}

fn service_id() -> String {
    format!("{SITE_ID}:{}", uuid::Uuid::new_v4())
}

/// Registrations of the simulator's services, from the server URL and SSO
/// names held in `settings`.
pub fn registrations(settings: &Settings, instance_uuid: &str) -> Vec<RegistrationInfo> {
    let opt = |key: &str| settings.get_str(key).unwrap_or_default().to_string();
    let base = opt("vcsim.server.url");
    let sdk = format!("{base}/sdk");
    let admin = opt("config.vpxd.sso.default.admin");
    let owner = opt("config.vpxd.sso.solutionUser.name");
    let identity = ServiceType { product: "com.vmware.cis".into(), kind: "cs.identity".into() };

    let sts = RegistrationInfo {
        service_version: LOOKUP_VERSION.to_string(),
        owner_id: admin.clone(),
        service_type: identity.clone(),
        node_id: String::new(),
        service_id: service_id(),
        site_id: SITE_ID.to_string(),
        service_endpoints: vec![endpoint(
            opt("config.vpxd.sso.sts.uri"),
            "wsTrust",
            "com.vmware.cis.cs.identity.sso",
        )],
        service_attributes: Vec::new(),
    };
    let sso_admin = RegistrationInfo {
        service_id: service_id(),
        service_endpoints: vec![endpoint(
            opt("config.vpxd.sso.admin.uri"),
            "vmomi",
            "com.vmware.cis.cs.identity.admin",
        )],
        ..sts.clone()
    };
    let mut vim = endpoint(sdk.clone(), "vmomi", "com.vmware.vim");
    vim.endpoint_attributes.push(attribute("cis.common.ep.localurl", &sdk));
    let vcenter = RegistrationInfo {
        service_version: vim_api_types::API_RELEASE.to_string(),
        owner_id: owner.clone(),
        service_type: ServiceType {
            product: "com.vmware.cis".into(),
            kind: "vcenterserver".into(),
        },
        node_id: uuid::Uuid::new_v4().to_string(),
        service_id: instance_uuid.to_string(),
        site_id: SITE_ID.to_string(),
        service_endpoints: vec![vim],
        service_attributes: vec![
            attribute("com.vmware.cis.cm.GroupInternalId", "com.vmware.vim.vcenter"),
            attribute(
                "com.vmware.vim.vcenter.instanceName",
                &opt("VirtualCenter.InstanceName"),
            ),
            attribute("com.vmware.cis.cm.ControlScript", "service-control-default-vmon"),
            attribute("com.vmware.cis.cm.HostId", &uuid::Uuid::new_v4().to_string()),
        ],
    };
    let vapi = RegistrationInfo {
        service_version: LOOKUP_VERSION.to_string(),
        owner_id: owner,
        service_type: ServiceType { product: "com.vmware.cis".into(), kind: "cs.vapi".into() },
        node_id: vcenter.node_id.clone(),
        service_id: service_id(),
        site_id: SITE_ID.to_string(),
        service_endpoints: vec![endpoint(
            format!("{base}/api"),
            "vapi.json.https.public",
            "com.vmware.vapi.endpoint",
        )],
        service_attributes: Vec::new(),
    };
    // Older clients still look the STS up by this service type.
    let legacy_sts = RegistrationInfo {
        service_type: ServiceType { kind: "sso:sts".into(), ..identity },
        ..sts.clone()
    };
    vec![sts, sso_admin, vcenter, vapi, legacy_sts]
}

/// Applies `filter` to `all`. Endpoints of the wrong type are dropped, and
/// with them registrations left without endpoints.
pub fn list(all: &[RegistrationInfo], filter: &RegistrationFilter) -> Vec<RegistrationInfo> {
    let wanted = |want: &Option<String>, have: &str| {
        want.as_deref().map_or(true, |w| w.is_empty() || w == have)
    };
    all.iter()
        .filter(|info| wanted(&filter.site_id, &info.site_id))
        .filter(|info| wanted(&filter.node_id, &info.node_id))
        .filter(|info| {
            filter.service_type.as_ref().map_or(true, |t| t.matches(&info.service_type))
        })
        .filter_map(|info| {
            let Some(kind) = &filter.endpoint_type else {
                return Some(info.clone());
            };
            let endpoints: Vec<Endpoint> = info
                .service_endpoints
                .iter()
                .filter(|e| kind.matches(&e.endpoint_type))
                .cloned()
                .collect();
            (!endpoints.is_empty())
                .then(|| RegistrationInfo { service_endpoints: endpoints, ..info.clone() })
        })
        .collect()
}

/// Points the endpoint URLs of `infos` at `host`, the address the client
/// reached the simulator by.
fn rehost(infos: &mut [RegistrationInfo], base: &str, host: &str) {
    let Some((scheme, authority)) = base.split_once("://") else {
        return;
    };
    if authority == host {
        return;
    }
    let from = format!("{scheme}://{authority}");
    let to = format!("{scheme}://{host}");
    for endpoint in infos.iter_mut().flat_map(|i| i.service_endpoints.iter_mut()) {
        if let Some(rest) = endpoint.url.strip_prefix(&from) {
            endpoint.url = format!("{to}{rest}");
        }
        for attr in &mut endpoint.endpoint_attributes {
            if let Some(rest) = attr.value.strip_prefix(&from) {
                attr.value = format!("{to}{rest}");
            }
        }
    }
}

fn service_fault(message: &str) -> HttpError {
    HttpError::for_bad_request(Some(SERVICE_FAULT.to_string()), message.to_string())
}

/// `action=list` of the registrations matching the filter criteria.
#[endpoint {
    method = POST,
    path = "/lookupservice/registration",
}]
pub async fn registration_list(
    rqctx: RequestContext<Arc<Context>>,
    query: Query<ActionQuery>,
    body: TypedBody<ListRequest>,
) -> Result<HttpResponseOk<Vec<RegistrationInfo>>, HttpError> {
    let ctx = rqctx.context();
    if !ctx.is_vcenter() {
        return Err(HttpError::for_not_found(None, "lookup service".to_string()));
    }
    match query.into_inner().action.as_deref() {
        Some("list") => {}
        other => {
            return Err(HttpError::for_bad_request(
                None,
                format!("unsupported action {other:?}"),
            ))
        }
    }
    let Some(filter) = body.into_inner().filter_criteria else {
        return Err(service_fault("Invalid fault"));
    };

    let all = match ctx.registrations.get() {
        Some(all) => all,
        None => {
            let inv = ctx.inventory.lock().await;
            let built = registrations(&inv.settings, &inv.content.about.instance_uuid);
            ctx.registrations.get_or_init(|| built)
        }
    };
    let mut infos = list(all, &filter);
    let host = rqctx
        .request
        .headers()
        .get(http::header::HOST)
        .and_then(|h| h.to_str().ok());
    if let Some(host) = host {
        rehost(&mut infos, &ctx.url(), host);
    }
    Ok(HttpResponseOk(infos))
}

#[endpoint {
    method = GET,
    path = "/lookupservice/site-id",
}]
pub async fn site_id(
    rqctx: RequestContext<Arc<Context>>,
) -> Result<HttpResponseOk<String>, HttpError> {
    if !rqctx.context().is_vcenter() {
        return Err(HttpError::for_not_found(None, "lookup service".to_string()));
    }
    Ok(HttpResponseOk(SITE_ID.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "http://127.0.0.1:8989";

    fn all() -> Vec<RegistrationInfo> {
        let mut settings = Settings::vpx();
        settings.set("vcsim.server.url", json!(BASE));
        settings.set("config.vpxd.sso.sts.uri", json!(format!("{BASE}/sts/STSService/vsphere.local")));
        settings.set("config.vpxd.sso.admin.uri", json!(format!("{BASE}/sso-adminserver")));
        registrations(&settings, "instance-uuid")
    }

    #[test]
    fn services_are_registered() {
        let all = all();
        assert_eq!(all.len(), 5);
        let vc = &all[2];
        assert_eq!(vc.service_id, "instance-uuid");
        assert_eq!(vc.service_endpoints[0].url, format!("{BASE}/sdk"));
        assert_eq!(vc.owner_id, "vpxd-b643d01c-928f-469b-96a5-d571d762a78e@vsphere.local");
        assert_eq!(all[4].service_type.kind, "sso:sts");
        assert!(all.iter().all(|i| i.site_id == SITE_ID));
    }

    #[test]
    fn filters() {
        let all = all();
        assert_eq!(list(&all, &RegistrationFilter::default()).len(), 5);

        let identity = RegistrationFilter {
            service_type: Some(ServiceType { product: "com.vmware.cis".into(), kind: "cs.identity".into() }),
            ..Default::default()
        };
        assert_eq!(list(&all, &identity).len(), 2);

        let admin = RegistrationFilter {
            endpoint_type: Some(EndpointType {
                protocol: "vmomi".into(),
                kind: "com.vmware.cis.cs.identity.admin".into(),
            }),
            ..identity
        };
        let found = list(&all, &admin);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_endpoints[0].url, format!("{BASE}/sso-adminserver"));

        let other_site = RegistrationFilter { site_id: Some("elsewhere".into()), ..Default::default() };
        assert!(list(&all, &other_site).is_empty());

        let node = all[2].node_id.clone();
        let by_node = RegistrationFilter { node_id: Some(node), ..Default::default() };
        assert_eq!(list(&all, &by_node).len(), 2);
    }

    #[test]
    fn urls_follow_the_request_host() {
        let mut infos = all();
        rehost(&mut infos, BASE, "vcsim.example.com:443");
        let vc = &infos[2].service_endpoints[0];
        assert_eq!(vc.url, "http://vcsim.example.com:443/sdk");
        assert_eq!(vc.endpoint_attributes[0].value, "http://vcsim.example.com:443/sdk");

        let mut infos = all();
        rehost(&mut infos, BASE, "127.0.0.1:8989");
        assert_eq!(infos[2].service_endpoints[0].url, format!("{BASE}/sdk"));
    }
}
