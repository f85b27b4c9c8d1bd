// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property paths and the VIM type hierarchy.
//!
//! A path is a dotted list of members, where a member naming an array may
//! select an element by key: `config.extraConfig["guestinfo.ip"].value`.

use serde_json::Value;
use vim_api_types::{MethodFault, MoRef};

const ENTITY: &[&str] = &[
    "name",
    "parent",
    "overallStatus",
    "configStatus",
    "disabledMethod",
    "recentTask",
    "customValue",
    "declaredAlarmState",
    "triggeredAlarmState",
    "effectiveRole",
    "permission",
    "tag",
    "alarmActionsEnabled",
    "value",
    "availableField",
];

/// Top-level properties of `kind`, excluding those inherited from
/// `ManagedEntity`.
fn own_properties(kind: &str) -> &'static [&'static str] {
    match kind {
        "Folder" => &["childType", "childEntity", "namespace"],
        "Datacenter" => &[
            "vmFolder",
            "hostFolder",
            "datastoreFolder",
            "networkFolder",
            "datastore",
            "network",
            "configuration",
        ],
        "ComputeResource" | "ClusterComputeResource" => &[
            "host",
            "resourcePool",
            "datastore",
            "network",
            "summary",
            "configurationEx",
            "environmentBrowser",
        ],
        "HostSystem" => &[
            "runtime",
            "summary",
            "vm",
            "datastore",
            "network",
            "hardware",
            "config",
            "capability",
            "configManager",
        ],
        "ResourcePool" => {
            &["owner", "resourcePool", "vm", "config", "summary", "runtime"]
        }
        "VirtualMachine" => &[
            "config",
            "runtime",
            "summary",
            "guest",
            "resourcePool",
            "datastore",
            "network",
            "snapshot",
            "rootSnapshot",
            "layout",
            "layoutEx",
            "storage",
            "guestHeartbeatStatus",
            "parentVApp",
            "environmentBrowser",
            "capability",
        ],
        "VirtualMachineSnapshot" => &["config", "vm", "childSnapshot"],
        "Datastore" => &["summary", "info", "host", "vm", "browser", "capability"],
        "Network" => &["summary", "host", "vm"],
        "DistributedVirtualPortgroup" => {
            &["summary", "host", "vm", "key", "config", "portKeys"]
        }
        "VmwareDistributedVirtualSwitch" | "DistributedVirtualSwitch" => {
            &["uuid", "summary", "portgroup", "config"]
        }
        "Task" => &["info"],
        "ServiceInstance" => &["content", "serverClock", "capability"],
        "SessionManager" => &[
            "currentSession",
            "sessionList",
            "defaultLocale",
            "supportedLocaleList",
            "message",
        ],
        "PropertyCollector" => &["filter"],
        "PropertyFilter" => &["spec", "partialUpdates"],
        "ViewManager" => &["viewList"],
        "ContainerView" => &["container", "type", "recursive", "view"],
        "ListView" => &["view"],
        "TaskManager" => &["recentTask", "description", "maxCollector"],
        "EventManager" => &["latestEvent", "maxCollector", "description"],
        "OptionManager" => &["setting", "supportedOption"],
        _ => &[],
    }
}

/// Supertypes of `kind`, nearest first.
fn supertypes(kind: &str) -> &'static [&'static str] {
    match kind {
        "Folder" | "Datacenter" | "ComputeResource" | "HostSystem"
        | "ResourcePool" | "VirtualMachine" | "Datastore" | "Network"
        | "DistributedVirtualSwitch" => &["ManagedEntity"],
        "ClusterComputeResource" => &["ComputeResource", "ManagedEntity"],
        "DistributedVirtualPortgroup" | "OpaqueNetwork" => {
            &["Network", "ManagedEntity"]
        }
        "VmwareDistributedVirtualSwitch" => {
            &["DistributedVirtualSwitch", "ManagedEntity"]
        }
        "VirtualApp" => &["ResourcePool", "ManagedEntity"],
        "ContainerView" | "ListView" | "InventoryView" => {
            &["ManagedObjectView", "View"]
        }
        "ManagedObjectView" => &["View"],
        _ => &[],
    }
}

/// Returns true if `kind` is `base` or derives from it.
pub fn is_kind_of(kind: &str, base: &str) -> bool {
    kind == base || supertypes(kind).contains(&base)
}

pub fn is_entity(kind: &str) -> bool {
    is_kind_of(kind, "ManagedEntity")
}

/// Known VIM types, used to validate type lists.
pub fn is_known_type(kind: &str) -> bool {
    kind == "ManagedEntity"
        || kind == "View"
        || !supertypes(kind).is_empty()
        || !own_properties(kind).is_empty()
}

/// Returns true if `name` is a top-level property of `kind`.
pub fn is_property(kind: &str, name: &str) -> bool {
    own_properties(kind).contains(&name)
        || (is_entity(kind) && ENTITY.contains(&name))
}

#[derive(Debug, PartialEq)]
struct Segment {
    name: String,
    key: Option<String>,
}

fn parse(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();
    loop {
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '.' || c == '[' {
                break;
            }
            name.push(c);
            chars.next();
        }
        if name.is_empty() {
            return None;
        }
        let mut key = None;
        if chars.peek() == Some(&'[') {
            chars.next();
            let mut raw = String::new();
            let mut quoted = false;
            loop {
                match chars.next()? {
                    '"' => quoted = !quoted,
                    ']' if !quoted => break,
                    c => raw.push(c),
                }
            }
            key = Some(raw);
        }
        segments.push(Segment { name, key });
        match chars.next() {
            None => return Some(segments),
            Some('.') => continue,
            Some(_) => return None,
        }
    }
}

fn key_matches(item: &Value, key: &str) -> bool {
    match item.get("key") {
        Some(Value::String(s)) => s == key,
        Some(Value::Number(n)) => n.to_string() == key,
        _ => false,
    }
}

/// Looks up `path` within the properties `obj` of an object of `kind`.
///
/// Returns `Ok(None)` for a valid path whose value is unset and
/// `InvalidProperty` for a path naming no property of the type.
pub fn lookup(
    kind: &str,
    obj: &Value,
    path: &str,
) -> Result<Option<Value>, MethodFault> {
    let invalid = || MethodFault::invalid_property(path);
    let segments = parse(path).ok_or_else(invalid)?;
    let first = &segments[0].name;
    if !is_property(kind, first) && obj.get(first).is_none() {
        return Err(invalid());
    }

    let mut cur = obj;
    for seg in &segments {
        cur = match cur {
            Value::Object(map) => match map.get(&seg.name) {
                Some(v) => v,
                None => return Ok(None),
            },
            Value::Null => return Ok(None),
            _ => return Err(invalid()),
        };
        if let Some(key) = &seg.key {
            cur = match cur {
                Value::Array(items) => {
                    match items.iter().find(|i| key_matches(i, key)) {
                        Some(item) => item,
                        None => return Ok(None),
                    }
                }
                Value::Null => return Ok(None),
                _ => return Err(invalid()),
            };
        }
    }
    match cur {
        Value::Null => Ok(None),
        v => Ok(Some(v.clone())),
    }
}

/// Managed object references found in `value`.
pub fn references(value: &Value) -> Vec<MoRef> {
    fn as_ref(v: &Value) -> Option<MoRef> {
        match (v.get("type"), v.get("value")) {
            (Some(Value::String(t)), Some(Value::String(id))) => {
                Some(MoRef::new(t.clone(), id.clone()))
            }
            _ => None,
        }
    }
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|i| as_ref(i).or_else(|| i.get("key").and_then(as_ref)))
            .collect(),
        v => as_ref(v).into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vm() -> Value {
        json!({
            "name": "vm0",
            "runtime": {"powerState": "poweredOn"},
            "config": {
                "extraConfig": [
                    {"key": "guestinfo.ip", "value": "10.0.0.1"},
                    {"key": "a", "value": "b"}
                ],
                "hardware": {"device": [{"key": 4000, "_typeName": "VirtualVmxnet3"}]}
            }
        })
    }

    #[test]
    fn parse_paths() {
        let segs = parse(r#"config.extraConfig["guestinfo.ip"].value"#).unwrap();
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[1].key.as_deref(), Some("guestinfo.ip"));
        assert!(parse("").is_none());
        assert!(parse("a..b").is_none());
        assert!(parse("a[\"x\"").is_none());
    }

    #[test]
    fn lookup_values() {
        let obj = vm();
        assert_eq!(
            lookup("VirtualMachine", &obj, "runtime.powerState").unwrap(),
            Some(json!("poweredOn"))
        );
        assert_eq!(
            lookup("VirtualMachine", &obj, r#"config.extraConfig["guestinfo.ip"].value"#)
                .unwrap(),
            Some(json!("10.0.0.1"))
        );
        assert_eq!(
            lookup("VirtualMachine", &obj, "config.hardware.device[4000]._typeName")
                .unwrap(),
            Some(json!("VirtualVmxnet3"))
        );
        // known but unset
        assert_eq!(lookup("VirtualMachine", &obj, "snapshot").unwrap(), None);
        assert_eq!(lookup("VirtualMachine", &obj, "runtime.bootTime").unwrap(), None);
        // unknown top-level property
        assert_eq!(
            lookup("VirtualMachine", &obj, "bogus").unwrap_err(),
            MethodFault::invalid_property("bogus")
        );
        // an array mid path
        assert!(lookup("VirtualMachine", &obj, "config.extraConfig.key").is_err());
    }

    #[test]
    fn type_hierarchy() {
        assert!(is_kind_of("ClusterComputeResource", "ComputeResource"));
        assert!(is_kind_of("ClusterComputeResource", "ManagedEntity"));
        assert!(is_kind_of("DistributedVirtualPortgroup", "Network"));
        assert!(!is_kind_of("Network", "DistributedVirtualPortgroup"));
        assert!(is_kind_of("ContainerView", "View"));
        assert!(is_property("Folder", "name"));
        assert!(!is_property("Task", "name"));
        assert!(is_known_type("VirtualMachine"));
        assert!(!is_known_type("Bogus"));
    }

    #[test]
    fn reference_extraction() {
        let refs = references(&json!([
            {"type": "HostSystem", "value": "host-1"},
            {"key": {"type": "HostSystem", "value": "host-2"}, "mountInfo": {}}
        ]));
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1], MoRef::new("HostSystem", "host-2"));
        assert!(references(&json!("x")).is_empty());
    }
}
