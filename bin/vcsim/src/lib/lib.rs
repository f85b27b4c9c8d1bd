// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory vCenter and ESXi simulator.
//!
//! The simulator serves the VIM API as VI/JSON under `/sdk`, the vAPI
//! services under `/api`, and the lookup and SSO admin services. Its
//! inventory is generated from a [`vcsim_config_toml::Model`].

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dropshot::ApiDescription;
use rand_distr::{Distribution, Normal};
use serde_json::Value;
use slog::{info, o, Logger};
use thiserror::Error;
use tokio::sync::Mutex;
use vim_api_types::lookup::RegistrationInfo;
use vim_api_types::MethodFault;

pub mod inventory;
pub mod lookup;
pub mod model;
pub mod registry;
pub mod ssoadmin;
pub mod vapi;
pub mod vim;

use inventory::Inventory;
use vim::option::Settings;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to build the inventory: {0}")]
    Model(MethodFault),
    #[error("failed to build the HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Simulator state shared by every endpoint.
pub struct Context {
    pub config: vcsim_config_toml::Config,
    pub inventory: Mutex<Inventory>,
    pub vapi: Mutex<vapi::State>,
    pub registrations: OnceLock<Vec<RegistrationInfo>>,
    pub http: reqwest::Client,
    url: OnceLock<String>,
    pub log: Logger,
}

impl Context {
    /// Builds the inventory described by `config.model`.
    pub fn new(config: vcsim_config_toml::Config, log: Logger) -> Result<Self, Error> {
        let esx = config.model.esx;
        let mut settings = if esx { Settings::esx() } else { Settings::vpx() };
        for (key, value) in &config.settings {
            settings.set(key, Value::String(value.clone()));
        }
        let mut inv = Inventory::new(esx, settings);
        model::populate(&mut inv, &config.model).map_err(Error::Model)?;
        let count = inv.registry.iter().count();
        info!(log, "inventory populated"; "esx" => esx, "objects" => count);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Context {
            config,
            inventory: Mutex::new(inv),
            vapi: Mutex::new(vapi::State::new(&log)),
            registrations: OnceLock::new(),
            http,
            url: OnceLock::new(),
            log,
        })
    }

    pub fn is_vcenter(&self) -> bool {
        !self.config.model.esx
    }

    /// Base URL the simulator is reachable at.
    pub fn url(&self) -> String {
        self.url
            .get()
            .cloned()
            .unwrap_or_else(|| "http://127.0.0.1".to_string())
    }

    /// Records the listening address and the service URLs derived from it.
    pub async fn set_url(&self, url: String) {
        let mut inv = self.inventory.lock().await;
        inv.settings.set("vcsim.server.url", Value::String(url.clone()));
        if self.is_vcenter() {
            inv.settings.set(
                "config.vpxd.sso.sts.uri",
                Value::String(format!("{url}/sts/STSService/vsphere.local")),
            );
            inv.settings.set(
                "config.vpxd.sso.admin.uri",
                Value::String(format!("{url}/sso-adminserver")),
            );
        }
        let _ = self.url.set(url);
    }

    /// The configured delay of `method`, varied by the configured jitter.
    ///
    /// Jitter is a coefficient of variation: the delay is drawn from a
    /// normal distribution with a standard deviation of `jitter * delay`,
    /// clamped at zero.
    pub fn jittered(&self, method: &str) -> Duration {
        let delay = self.config.delay.for_method(method);
        let jitter = self.config.delay.jitter;
        if delay.is_zero() || jitter <= 0.0 {
            return delay;
        }
        let Ok(normal) = Normal::new(0.0, jitter) else {
            return delay;
        };
        let factor: f64 = normal.sample(&mut rand::thread_rng());
        delay.mul_f64((1.0 + factor).max(0.0))
    }

    /// Sleeps for the configured delay of `method`.
    pub async fn delay(&self, method: &str) {
        let delay = self.jittered(method);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Returns a Dropshot [`ApiDescription`] of every simulated service.
pub fn api() -> ApiDescription<Arc<Context>> {
    let mut api = ApiDescription::new();
    api.register(vim::vim_method).unwrap();
    api.register(vim::vim_property).unwrap();

    api.register(vapi::session_create).unwrap();
    api.register(vapi::session_get).unwrap();
    api.register(vapi::session_delete).unwrap();

    api.register(vapi::tags::category_create).unwrap();
    api.register(vapi::tags::category_list).unwrap();
    api.register(vapi::tags::category_get).unwrap();
    api.register(vapi::tags::category_update).unwrap();
    api.register(vapi::tags::category_delete).unwrap();
    api.register(vapi::tags::tag_post).unwrap();
    api.register(vapi::tags::tag_list).unwrap();
    api.register(vapi::tags::tag_get).unwrap();
    api.register(vapi::tags::tag_update).unwrap();
    api.register(vapi::tags::tag_delete).unwrap();
    api.register(vapi::tags::association_tag).unwrap();
    api.register(vapi::tags::association).unwrap();

    api.register(vapi::library::library_list).unwrap();
    api.register(vapi::library::library_find).unwrap();
    api.register(vapi::library::library_get).unwrap();
    api.register(vapi::library::library_update).unwrap();
    api.register(vapi::library::library_delete).unwrap();
    api.register(vapi::library::local_library_list).unwrap();
    api.register(vapi::library::local_library_create).unwrap();
    api.register(vapi::library::local_library_action).unwrap();
    api.register(vapi::library::subscribed_library_list).unwrap();
    api.register(vapi::library::subscribed_library_create).unwrap();
    api.register(vapi::library::subscribed_library_action).unwrap();
    api.register(vapi::library::item_list).unwrap();
    api.register(vapi::library::item_post).unwrap();
    api.register(vapi::library::item_get).unwrap();
    api.register(vapi::library::item_update).unwrap();
    api.register(vapi::library::item_delete).unwrap();
    api.register(vapi::library::item_action).unwrap();
    api.register(vapi::library::item_files).unwrap();
    api.register(vapi::library::publication).unwrap();

    api.register(vapi::transfer::update_list).unwrap();
    api.register(vapi::transfer::update_create).unwrap();
    api.register(vapi::transfer::update_get).unwrap();
    api.register(vapi::transfer::update_action).unwrap();
    api.register(vapi::transfer::update_delete).unwrap();
    api.register(vapi::transfer::update_files).unwrap();
    api.register(vapi::transfer::update_file_action).unwrap();
    api.register(vapi::transfer::update_file_get).unwrap();
    api.register(vapi::transfer::upload_data).unwrap();
    api.register(vapi::transfer::download_list).unwrap();
    api.register(vapi::transfer::download_create).unwrap();
    api.register(vapi::transfer::download_get).unwrap();
    api.register(vapi::transfer::download_action).unwrap();
    api.register(vapi::transfer::download_delete).unwrap();
    api.register(vapi::transfer::download_files).unwrap();
    api.register(vapi::transfer::download_file_action).unwrap();
    api.register(vapi::transfer::download_file_get).unwrap();
    api.register(vapi::transfer::download_data).unwrap();

    api.register(vapi::cluster::module_list).unwrap();
    api.register(vapi::cluster::module_create).unwrap();
    api.register(vapi::cluster::module_delete).unwrap();
    api.register(vapi::cluster::module_members).unwrap();
    api.register(vapi::cluster::module_update_members).unwrap();

    api.register(vapi::vcenter::vm_list).unwrap();

    api.register(lookup::registration_list).unwrap();
    api.register(lookup::site_id).unwrap();

    api.register(ssoadmin::identity_source_list).unwrap();
    api.register(ssoadmin::user_list).unwrap();
    api.register(ssoadmin::user_create).unwrap();
    api.register(ssoadmin::user_get).unwrap();
    api.register(ssoadmin::user_update).unwrap();
    api.register(ssoadmin::user_delete).unwrap();
    api.register(ssoadmin::user_action).unwrap();
    api.register(ssoadmin::group_list).unwrap();
    api.register(ssoadmin::group_create).unwrap();
    api.register(ssoadmin::group_get).unwrap();
    api.register(ssoadmin::group_delete).unwrap();
    api.register(ssoadmin::group_members).unwrap();
    api.register(ssoadmin::group_update_members).unwrap();
    api.register(ssoadmin::password_policy_get).unwrap();
    api.register(ssoadmin::password_policy_update).unwrap();
    api.register(ssoadmin::certificate_list).unwrap();
    api.register(ssoadmin::certificate_add).unwrap();
    api
}

// These types need to be exposed so that consumers have names for them without
// having to maintain a dropshot dependency in lockstep with their dependency on
// this crate.

/// configuration for the dropshot server
pub type Config = dropshot::ConfigDropshot;
/// the dropshot server itself
pub type Server = dropshot::HttpServer<Arc<Context>>;
/// errors returned from attempting to start a dropshot server
pub type ServerStartError = Box<dyn std::error::Error + Send + Sync>;

/// Starts a simulator serving the inventory described by `sim`.
pub async fn start(
    config: Config,
    sim: vcsim_config_toml::Config,
    log: Logger,
) -> Result<Server, ServerStartError> {
    let vcsim_log = log.new(o!("component" => "vcsim"));
    let dropshot_log = log.new(o!("component" => "dropshot"));
    let private = Arc::new(Context::new(sim, vcsim_log)?);
    let starter = dropshot::HttpServerStarter::new(
        &config,
        api(),
        private.clone(),
        &dropshot_log,
    )?;
    let server = starter.start();
    private.set_url(format!("http://{}", server.local_addr())).await;
    info!(private.log, "listening"; "url" => private.url());
    Ok(server)
}
