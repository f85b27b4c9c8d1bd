// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property collector specifications and results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{LocalizedMethodFault, MoRef};

/// Which properties to collect from objects of a given type.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_set: Vec<String>,
}

impl PropertySpec {
    pub fn new<S: AsRef<str>>(kind: impl Into<String>, paths: &[S]) -> Self {
        Self {
            kind: kind.into(),
            all: None,
            path_set: paths.iter().map(|p| p.as_ref().to_string()).collect(),
        }
    }

    pub fn all(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), all: Some(true), path_set: Vec::new() }
    }
}

/// Follows the references found at `path` on objects of type `kind`.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_set: Vec<SelectionSpec>,
}

/// Either a reference to a named traversal or a traversal itself.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(tag = "_typeName")]
pub enum SelectionSpec {
    SelectionSpec {
        #[serde(default)]
        name: Option<String>,
    },
    TraversalSpec(TraversalSpec),
}

impl SelectionSpec {
    pub fn named(name: impl Into<String>) -> Self {
        SelectionSpec::SelectionSpec { name: Some(name.into()) }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            SelectionSpec::SelectionSpec { name } => name.as_deref(),
            SelectionSpec::TraversalSpec(ts) => ts.name.as_deref(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSpec {
    pub obj: MoRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_set: Vec<SelectionSpec>,
}

impl ObjectSpec {
    pub fn new(obj: MoRef) -> Self {
        Self { obj, skip: None, select_set: Vec::new() }
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFilterSpec {
    #[serde(default)]
    pub prop_set: Vec<PropertySpec>,
    #[serde(default)]
    pub object_set: Vec<ObjectSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_missing_objects_in_results: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_objects: Option<i32>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicProperty {
    pub name: String,
    pub val: serde_json::Value,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingProperty {
    pub path: String,
    pub fault: LocalizedMethodFault,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectContent {
    pub obj: MoRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prop_set: Vec<DynamicProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_set: Vec<MissingProperty>,
}

impl ObjectContent {
    /// Returns the value collected for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.prop_set.iter().find(|p| p.name == name).map(|p| &p.val)
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub objects: Vec<ObjectContent>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_object_updates: Option<i32>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyChangeOp {
    Add,
    Remove,
    Assign,
    IndirectRemove,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyChange {
    pub name: String,
    pub op: PropertyChangeOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectUpdateKind {
    Modify,
    Enter,
    Leave,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectUpdate {
    pub kind: ObjectUpdateKind,
    pub obj: MoRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub change_set: Vec<PropertyChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_set: Vec<MissingProperty>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFilterUpdate {
    pub filter: MoRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_set: Vec<ObjectUpdate>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSet {
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_set: Vec<PropertyFilterUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_specs_are_polymorphic() {
        let spec = TraversalSpec {
            name: Some("folderTraversal".into()),
            kind: "Folder".into(),
            path: "childEntity".into(),
            skip: Some(false),
            select_set: vec![SelectionSpec::named("folderTraversal")],
        };
        let json = serde_json::to_value(SelectionSpec::TraversalSpec(spec))
            .unwrap();
        assert_eq!(json["_typeName"], "TraversalSpec");
        assert_eq!(json["type"], "Folder");
        assert_eq!(json["selectSet"][0]["_typeName"], "SelectionSpec");
        assert_eq!(json["selectSet"][0]["name"], "folderTraversal");

        let back: SelectionSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.name(), Some("folderTraversal"));
    }
}
