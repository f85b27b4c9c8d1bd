// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for the simulator.
#[derive(Default, Serialize, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub model: Model,

    #[serde(default)]
    pub auth: Auth,

    #[serde(default)]
    pub session: Session,

    #[serde(default)]
    pub delay: Delay,

    /// Extra option manager settings, keyed by option name.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ParseError> {
        self.model.validate()?;
        if !(0.0..=1.0).contains(&self.delay.jitter) {
            return Err(ParseError::Invalid(format!(
                "delay.jitter must be within [0, 1], got {}",
                self.delay.jitter
            )));
        }
        Ok(())
    }
}

/// Shape of the simulated inventory.
///
/// Counts are per parent: `cluster_host` hosts in each cluster, `machine`
/// VMs in each resource pool and standalone host, and so on.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Model {
    /// Simulate a standalone ESX host rather than a vCenter.
    pub esx: bool,
    pub datacenter: usize,
    pub folder: usize,
    pub cluster: usize,
    pub cluster_host: usize,
    pub host: usize,
    pub pool: usize,
    pub datastore: usize,
    pub machine: usize,
    pub portgroup: usize,
    pub autostart: bool,
}

impl Model {
    /// The default vCenter inventory.
    pub fn vpx() -> Self {
        Model {
            esx: false,
            datacenter: 1,
            folder: 0,
            cluster: 1,
            cluster_host: 3,
            host: 1,
            pool: 1,
            datastore: 1,
            machine: 2,
            portgroup: 1,
            autostart: true,
        }
    }

    /// The default standalone host inventory.
    pub fn esx() -> Self {
        Model {
            esx: true,
            datacenter: 1,
            folder: 0,
            cluster: 0,
            cluster_host: 0,
            host: 1,
            pool: 0,
            datastore: 1,
            machine: 2,
            portgroup: 0,
            autostart: true,
        }
    }

    fn validate(&self) -> Result<(), ParseError> {
        if self.esx
            && (self.datacenter != 1
                || self.host != 1
                || self.cluster != 0
                || self.folder != 0)
        {
            return Err(ParseError::Invalid(
                "an esx model has exactly one datacenter and one host, and \
                 no clusters or folders"
                    .to_string(),
            ));
        }
        if self.cluster > 0 && self.cluster_host == 0 {
            return Err(ParseError::Invalid(
                "clusters require at least one host".to_string(),
            ));
        }
        if self.machine > 0 && self.datastore == 0 {
            return Err(ParseError::Invalid(
                "virtual machines require at least one datastore".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of objects of each type the model creates.
    pub fn count(&self) -> Count {
        let dc = self.datacenter;
        let hosts = self.host + self.cluster * self.cluster_host;
        Count {
            datacenter: dc,
            folder: self.folder,
            cluster: dc * self.cluster,
            compute_resource: dc * self.host,
            host: dc * hosts,
            pool: dc * (self.host + self.cluster * (1 + self.pool)),
            datastore: dc * self.datastore,
            machine: dc * (self.host + self.cluster) * self.machine,
            switch: if self.portgroup > 0 { dc } else { 0 },
            portgroup: dc * self.portgroup,
            network: dc,
        }
    }
}

/// Per-type object totals of a [`Model`]. Resource pools include the root
/// pool of every compute resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Count {
    pub datacenter: usize,
    pub folder: usize,
    pub cluster: usize,
    pub compute_resource: usize,
    pub host: usize,
    pub pool: usize,
    pub datastore: usize,
    pub machine: usize,
    pub switch: usize,
    pub portgroup: usize,
    pub network: usize,
}

impl Default for Model {
    fn default() -> Self {
        Model::vpx()
    }
}

/// Credentials accepted by `Login` and vAPI session creation.
///
/// An empty username accepts any non-empty credentials.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Auth {
    pub username: String,
    pub password: String,
}

impl Default for Auth {
    fn default() -> Self {
        Auth { username: "user".to_string(), password: "pass".to_string() }
    }
}

impl Auth {
    pub fn accepts(&self, username: &str, password: &str) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }
        self.username.is_empty()
            || (self.username == username && self.password == password)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Session {
    /// Seconds of inactivity after which a session is removed; zero
    /// disables expiry.
    pub idle_timeout_secs: u64,
    /// Seconds a finished content library transfer session is kept.
    pub transfer_expiration_secs: u64,
}

impl Default for Session {
    fn default() -> Self {
        Session { idle_timeout_secs: 1800, transfer_expiration_secs: 3600 }
    }
}

impl Session {
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn transfer_expiration(&self) -> Duration {
        Duration::from_secs(self.transfer_expiration_secs)
    }
}

/// Artificial latency applied to method calls and tasks.
#[derive(Clone, Default, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Delay {
    /// Delay applied to every call, in milliseconds.
    pub delay_ms: u64,
    /// Coefficient of variation applied to each delay.
    pub jitter: f64,
    /// Per-method delay in milliseconds, keyed by method name.
    pub method: BTreeMap<String, u64>,
}

impl Delay {
    /// Returns the base delay for `method`, before jitter.
    pub fn for_method(&self, method: &str) -> Duration {
        let ms = self.method.get(method).copied().unwrap_or(0) + self.delay_ms;
        Duration::from_millis(ms)
    }
}

/// Errors which may be returned when parsing the simulator configuration.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Parses a TOML file into a configuration object.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<Config, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let cfg = toml::from_str::<Config>(&contents)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_can_be_serialized_as_toml() {
        let dummy_config = Config { ..Default::default() };
        let serialized = toml::ser::to_string(&dummy_config).unwrap();
        let deserialized: Config = toml::de::from_str(&serialized).unwrap();
        assert_eq!(dummy_config, deserialized);
    }

    #[test]
    fn model_counts() {
        let vpx = Model::vpx().count();
        assert_eq!(vpx.host, 4);
        assert_eq!(vpx.machine, 4);
        assert_eq!(vpx.pool, 3);
        assert_eq!(vpx.portgroup, 1);

        let esx = Model::esx().count();
        assert_eq!(esx.host, 1);
        assert_eq!(esx.cluster, 0);
        assert_eq!(esx.machine, 2);
        assert_eq!(esx.switch, 0);
    }

    #[test]
    fn machines_need_storage() {
        let model = Model { datastore: 0, ..Model::vpx() };
        assert!(matches!(model.validate(), Err(ParseError::Invalid(_))));
    }

    #[test]
    fn empty_config_is_default_vpx() {
        let cfg: Config = toml::de::from_str("").unwrap();
        assert_eq!(cfg.model, Model::vpx());
        assert_eq!(cfg.auth, Auth::default());
        assert_eq!(cfg.session.idle_timeout(), Some(Duration::from_secs(1800)));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_basic_config() {
        let raw = r#"
[model]
cluster = 2
machine = 4
autostart = false

[auth]
username = "administrator@vsphere.local"
password = "secret"

[session]
idle_timeout_secs = 0

[delay]
delay_ms = 10
jitter = 0.5

[delay.method]
PowerOnVM_Task = 250

[settings]
"config.vpxd.sso.default.admin" = "Administrator@vsphere.local"
"#;
        let cfg: Config = toml::de::from_str(raw).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.model.cluster, 2);
        assert_eq!(cfg.model.machine, 4);
        assert!(!cfg.model.autostart);
        // unspecified members keep their defaults
        assert_eq!(cfg.model.cluster_host, 3);

        assert!(cfg.auth.accepts("administrator@vsphere.local", "secret"));
        assert!(!cfg.auth.accepts("administrator@vsphere.local", "nope"));
        assert_eq!(cfg.session.idle_timeout(), None);

        assert_eq!(
            cfg.delay.for_method("PowerOnVM_Task"),
            Duration::from_millis(260)
        );
        assert_eq!(cfg.delay.for_method("Destroy_Task"), Duration::from_millis(10));
        assert_eq!(
            cfg.settings.get("config.vpxd.sso.default.admin").map(String::as_str),
            Some("Administrator@vsphere.local")
        );
    }

    #[test]
    fn open_auth_accepts_any_credentials() {
        let auth = Auth { username: String::new(), password: String::new() };
        assert!(auth.accepts("anyone", "anything"));
        assert!(!auth.accepts("", "anything"));
        assert!(!auth.accepts("anyone", ""));
    }

    #[test]
    fn invalid_models_are_rejected() {
        let mut model = Model::esx();
        assert!(model.validate().is_ok());
        model.cluster = 1;
        assert!(matches!(model.validate(), Err(ParseError::Invalid(_))));

        let cfg = Config {
            delay: Delay { jitter: 2.0, ..Default::default() },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[model]\nesx = true\ncluster = 0\npool = 0").unwrap();
        let cfg = parse(file.path()).unwrap();
        assert!(cfg.model.esx);

        let missing = parse("/nonexistent/vcsim.toml");
        assert!(matches!(missing, Err(ParseError::Io(_))));
    }
}
