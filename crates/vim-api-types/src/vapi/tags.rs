// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tagging service types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::MoRef;

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cardinality {
    Single,
    #[default]
    Multiple,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub associable_types: Vec<String>,
    #[serde(default)]
    pub used_by: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct CategoryCreateSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub associable_types: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct CategoryUpdateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associable_types: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct CategoryCreate {
    pub create_spec: CategoryCreateSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct CategoryUpdate {
    pub update_spec: CategoryUpdateSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category_id: String,
    #[serde(default)]
    pub used_by: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct TagCreateSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category_id: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct TagUpdateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct TagCreate {
    pub create_spec: TagCreateSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct TagUpdate {
    pub update_spec: TagUpdateSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct CategoryIdBody {
    pub category_id: String,
}

/// Identifies an inventory object in the tagging service.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct DynamicId {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl From<&MoRef> for DynamicId {
    fn from(r: &MoRef) -> Self {
        DynamicId { kind: r.kind.clone(), id: r.value.clone() }
    }
}

impl From<&DynamicId> for MoRef {
    fn from(d: &DynamicId) -> Self {
        MoRef::new(d.kind.clone(), d.id.clone())
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ObjectIdBody {
    pub object_id: DynamicId,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ObjectIdsBody {
    pub object_ids: Vec<DynamicId>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct TagIdsBody {
    pub tag_ids: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct AttachMultipleTagsBody {
    pub object_id: DynamicId,
    pub tag_ids: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct TagToObjects {
    pub tag_id: String,
    pub object_ids: Vec<DynamicId>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ObjectToTags {
    pub object_id: DynamicId,
    pub tag_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct BatchResult {
    pub success: bool,
    #[serde(default)]
    pub error_messages: Vec<String>,
}
