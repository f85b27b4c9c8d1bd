// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `OptionManager` settings.

use serde_json::{json, Value};
use vim_api_types::methods::{QueryOptionsRequest, UpdateOptionsRequest};
use vim_api_types::{MethodFault, MoRef, OptionValue};

use super::{decode, encode, method_not_found, Call, MethodResult};

/// Option settings in insertion order.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    values: Vec<OptionValue>,
}

impl Settings {
    /// Default settings of a simulated vCenter.
    pub fn vpx() -> Self {
        let mut s = Settings::default();
        s.set("VirtualCenter.InstanceName", json!("vcsim"));
        s.set("VirtualCenter.FQDN", json!("vcsim.local"));
        s.set("config.vpxd.sso.default.admin", json!("Administrator@vsphere.local"));
        s.set(
            "config.vpxd.sso.solutionUser.name",
            json!("vpxd-b643d01c-928f-469b-96a5-d571d762a78e@vsphere.local"),
        );
        s.set("event.maxAge", json!(30));
        s.set("event.maxAgeEnabled", json!(false));
        s.set("task.maxAge", json!(30));
        s.set("task.maxAgeEnabled", json!(false));
        s
    }

    /// Default settings of a simulated standalone host.
    pub fn esx() -> Self {
        let mut s = Settings::default();
        s.set("Config.HostAgent.log.level", json!("info"));
        s.set("Config.HostAgent.plugins.solo.enableMob", json!(false));
        s
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.iter().find(|o| o.key == key).map(|o| &o.value)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Sets `key`, appending it if new.
    pub fn set(&mut self, key: &str, value: Value) {
        match self.values.iter_mut().find(|o| o.key == key) {
            Some(o) => o.value = value,
            None => self.values.push(OptionValue::new(key, value)),
        }
    }

    /// Settings whose key starts with `prefix`.
    pub fn query(&self, prefix: &str) -> Vec<OptionValue> {
        self.values.iter().filter(|o| o.key.starts_with(prefix)).cloned().collect()
    }

    pub fn all(&self) -> &[OptionValue] {
        &self.values
    }
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    match method {
        "QueryOptions" => {
            let req: QueryOptionsRequest = decode(args)?;
            let name = req.name.unwrap_or_default();
            let found = call.inv.settings.query(&name);
            if found.is_empty() {
                return Err(MethodFault::InvalidName { name, entity: None });
            }
            encode(&found)
        }
        "UpdateOptions" => {
            let req: UpdateOptionsRequest = decode(args)?;
            // Keys with this prefix never exist, for exercising failures.
            if let Some(bad) =
                req.changed_value.iter().find(|o| o.key.starts_with("ENOENT."))
            {
                return Err(MethodFault::InvalidName {
                    name: bad.key.clone(),
                    entity: None,
                });
            }
            for opt in req.changed_value {
                call.inv.settings.set(&opt.key, opt.value);
            }
            call.inv.registry.touch();
            Ok(Value::Null)
        }
        _ => Err(method_not_found(this, method)),
    }
}

pub fn properties(settings: &Settings) -> Value {
    json!({
        "setting": settings.all(),
        "supportedOption": [],
    })
}
