// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tagging: categories, tags and their associations with inventory
//! objects.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dropshot::{
    endpoint, HttpError, HttpResponseDeleted, HttpResponseOk,
    HttpResponseUpdatedNoContent, Path, Query, RequestContext, TypedBody,
    UntypedBody,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use vim_api_types::vapi::tags::{
    AttachMultipleTagsBody, BatchResult, Cardinality, Category, CategoryCreate,
    CategoryCreateSpec, CategoryIdBody, CategoryUpdate, CategoryUpdateSpec,
    DynamicId, ObjectIdBody, ObjectIdsBody, ObjectToTags, Tag, TagCreate,
    TagCreateSpec, TagIdsBody, TagToObjects, TagUpdate, TagUpdateSpec,
};
use vim_api_types::vapi::ActionQuery;
use vim_api_types::MoRef;

use super::{action, authorize, decode, unknown_action, Error, VapiResult};
use crate::registry::Registry;
use crate::Context;

fn category_id() -> String {
    format!("urn:vmomi:InventoryServiceCategory:{}:GLOBAL", uuid::Uuid::new_v4())
}

fn tag_id() -> String {
    format!("urn:vmomi:InventoryServiceTag:{}:GLOBAL", uuid::Uuid::new_v4())
}

#[derive(Default)]
pub struct Store {
    categories: BTreeMap<String, Category>,
    tags: BTreeMap<String, Tag>,
    attached: BTreeMap<String, BTreeSet<DynamicId>>,
}

impl Store {
    pub fn create_category(&mut self, spec: CategoryCreateSpec) -> VapiResult<String> {
        if spec.name.is_empty() {
            return Err(Error::InvalidArgument("create_spec.name".into()));
        }
        if self.categories.values().any(|c| c.name == spec.name) {
            return Err(Error::AlreadyExists(spec.name));
        }
        let id = category_id();
        self.categories.insert(
            id.clone(),
            Category {
                id: id.clone(),
                name: spec.name,
                description: spec.description,
                cardinality: spec.cardinality,
                associable_types: spec.associable_types,
                used_by: Vec::new(),
            },
        );
        Ok(id)
    }

    pub fn categories(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    pub fn category(&self, id: &str) -> VapiResult<&Category> {
        self.categories
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("category {id}")))
    }

    pub fn update_category(&mut self, id: &str, spec: CategoryUpdateSpec) -> VapiResult<()> {
        let existing = self.category(id)?;
        if let Some(name) = &spec.name {
            if self.categories.values().any(|c| &c.name == name && c.id != id) {
                return Err(Error::AlreadyExists(name.clone()));
            }
        }
        if let Some(types) = &spec.associable_types {
            if !existing.associable_types.iter().all(|t| types.contains(t)) {
                return Err(Error::InvalidArgument(
                    "associable types can only be appended".into(),
                ));
            }
        }
        if spec.cardinality == Some(Cardinality::Single)
            && existing.cardinality == Cardinality::Multiple
        {
            return Err(Error::InvalidArgument(
                "cardinality cannot change from MULTIPLE to SINGLE".into(),
            ));
        }
        let Some(category) = self.categories.get_mut(id) else {
            return Err(Error::NotFound(format!("category {id}")));
        };
        if let Some(name) = spec.name {
            category.name = name;
        }
        if let Some(description) = spec.description {
            category.description = description;
        }
        if let Some(cardinality) = spec.cardinality {
            category.cardinality = cardinality;
        }
        if let Some(types) = spec.associable_types {
            category.associable_types = types;
        }
        Ok(())
    }

    /// Deletes a category with its tags and their associations.
    pub fn delete_category(&mut self, id: &str) -> VapiResult<()> {
        self.categories
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("category {id}")))?;
        let doomed: Vec<String> = self
            .tags
            .values()
            .filter(|t| t.category_id == id)
            .map(|t| t.id.clone())
            .collect();
        for tag in doomed {
            self.tags.remove(&tag);
            self.attached.remove(&tag);
        }
        Ok(())
    }

    pub fn create_tag(&mut self, spec: TagCreateSpec) -> VapiResult<String> {
        self.category(&spec.category_id)?;
        if spec.name.is_empty() {
            return Err(Error::InvalidArgument("create_spec.name".into()));
        }
        if self
            .tags
            .values()
            .any(|t| t.category_id == spec.category_id && t.name == spec.name)
        {
            return Err(Error::AlreadyExists(spec.name));
        }
        let id = tag_id();
        self.tags.insert(
            id.clone(),
            Tag {
                id: id.clone(),
                name: spec.name,
                description: spec.description,
                category_id: spec.category_id,
                used_by: Vec::new(),
            },
        );
        Ok(id)
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    pub fn tags_for_category(&self, category: &str) -> VapiResult<Vec<String>> {
        self.category(category)?;
        Ok(self
            .tags
            .values()
            .filter(|t| t.category_id == category)
            .map(|t| t.id.clone())
            .collect())
    }

    pub fn tag(&self, id: &str) -> VapiResult<&Tag> {
        self.tags.get(id).ok_or_else(|| Error::NotFound(format!("tag {id}")))
    }

    pub fn update_tag(&mut self, id: &str, spec: TagUpdateSpec) -> VapiResult<()> {
        let tag = self.tag(id)?;
        if let Some(name) = &spec.name {
            if self
                .tags
                .values()
                .any(|t| t.category_id == tag.category_id && &t.name == name && t.id != id)
            {
                return Err(Error::AlreadyExists(name.clone()));
            }
        }
        let Some(tag) = self.tags.get_mut(id) else {
            return Err(Error::NotFound(format!("tag {id}")));
        };
        if let Some(name) = spec.name {
            tag.name = name;
        }
        if let Some(description) = spec.description {
            tag.description = description;
        }
        Ok(())
    }

    pub fn delete_tag(&mut self, id: &str) -> VapiResult<()> {
        self.tags.remove(id).ok_or_else(|| Error::NotFound(format!("tag {id}")))?;
        self.attached.remove(id);
        Ok(())
    }

    /// Attaches tag `id` to `object`, which must exist in `reg`.
    pub fn attach(&mut self, reg: &Registry, id: &str, object: &DynamicId) -> VapiResult<()> {
        let tag = self.tag(id)?;
        if !reg.contains(&MoRef::from(object)) {
            return Err(Error::NotFound(format!("object {}:{}", object.kind, object.id)));
        }
        let category = self.category(&tag.category_id)?;
        if !category.associable_types.is_empty()
            && !category.associable_types.contains(&object.kind)
        {
            return Err(Error::InvalidArgument(format!(
                "type {} is not associable with category {}",
                object.kind, category.name
            )));
        }
        if category.cardinality == Cardinality::Single {
            let taken = self.attached.iter().any(|(other, objects)| {
                other != id
                    && objects.contains(object)
                    && self.tags.get(other).map(|t| &t.category_id)
                        == Some(&category.id)
            });
            if taken {
                return Err(Error::InvalidArgument(format!(
                    "category {} allows a single tag per object",
                    category.name
                )));
            }
        }
        self.attached.entry(id.to_string()).or_default().insert(object.clone());
        Ok(())
    }

    pub fn detach(&mut self, id: &str, object: &DynamicId) -> VapiResult<()> {
        self.tag(id)?;
        if let Some(objects) = self.attached.get_mut(id) {
            objects.remove(object);
        }
        Ok(())
    }

    pub fn attached_objects(&self, id: &str) -> VapiResult<Vec<DynamicId>> {
        self.tag(id)?;
        Ok(self.attached.get(id).into_iter().flatten().cloned().collect())
    }

    pub fn attached_tags(&self, object: &DynamicId) -> Vec<String> {
        self.attached
            .iter()
            .filter(|(_, objects)| objects.contains(object))
            .map(|(tag, _)| tag.clone())
            .collect()
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct CategoryPath {
    category_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct TagPath {
    tag_id: String,
}

#[endpoint {
    method = POST,
    path = "/api/cis/tagging/category",
}]
pub async fn category_create(
    rqctx: RequestContext<Arc<Context>>,
    body: TypedBody<CategoryCreate>,
) -> std::result::Result<HttpResponseOk<String>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let id = state.tags.create_category(body.into_inner().create_spec)?;
    Ok(HttpResponseOk(id))
}

#[endpoint {
    method = GET,
    path = "/api/cis/tagging/category",
}]
pub async fn category_list(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<Vec<String>>, HttpError> {
    let state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.tags.categories()))
}

#[endpoint {
    method = GET,
    path = "/api/cis/tagging/category/{category_id}",
}]
pub async fn category_get(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<CategoryPath>,
) -> std::result::Result<HttpResponseOk<Category>, HttpError> {
    let state = authorize(&rqctx).await?;
    let category = state.tags.category(&path.into_inner().category_id)?;
    Ok(HttpResponseOk(category.clone()))
}

#[endpoint {
    method = PATCH,
    path = "/api/cis/tagging/category/{category_id}",
}]
pub async fn category_update(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<CategoryPath>,
    body: TypedBody<CategoryUpdate>,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut state = authorize(&rqctx).await?;
    state
        .tags
        .update_category(&path.into_inner().category_id, body.into_inner().update_spec)?;
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = DELETE,
    path = "/api/cis/tagging/category/{category_id}",
}]
pub async fn category_delete(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<CategoryPath>,
) -> std::result::Result<HttpResponseDeleted, HttpError> {
    let mut state = authorize(&rqctx).await?;
    state.tags.delete_category(&path.into_inner().category_id)?;
    Ok(HttpResponseDeleted())
}

/// Creates a tag, or lists the tags of a category with
/// `action=list-tags-for-category`.
#[endpoint {
    method = POST,
    path = "/api/cis/tagging/tag",
}]
pub async fn tag_post(
    rqctx: RequestContext<Arc<Context>>,
    query: Query<ActionQuery>,
    body: UntypedBody,
) -> std::result::Result<HttpResponseOk<Value>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let query = query.into_inner();
    let value = match action(&query) {
        "" => {
            let req: TagCreate = decode(&body)?;
            Value::from(state.tags.create_tag(req.create_spec)?)
        }
        "list-tags-for-category" => {
            let req: CategoryIdBody = decode(&body)?;
            Value::from(state.tags.tags_for_category(&req.category_id)?)
        }
        other => return Err(unknown_action(other).into()),
    };
    Ok(HttpResponseOk(value))
}

#[endpoint {
    method = GET,
    path = "/api/cis/tagging/tag",
}]
pub async fn tag_list(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<Vec<String>>, HttpError> {
    let state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.tags.tags()))
}

#[endpoint {
    method = GET,
    path = "/api/cis/tagging/tag/{tag_id}",
}]
pub async fn tag_get(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<TagPath>,
) -> std::result::Result<HttpResponseOk<Tag>, HttpError> {
    let state = authorize(&rqctx).await?;
    let tag = state.tags.tag(&path.into_inner().tag_id)?;
    Ok(HttpResponseOk(tag.clone()))
}

#[endpoint {
    method = PATCH,
    path = "/api/cis/tagging/tag/{tag_id}",
}]
pub async fn tag_update(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<TagPath>,
    body: TypedBody<TagUpdate>,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut state = authorize(&rqctx).await?;
    state.tags.update_tag(&path.into_inner().tag_id, body.into_inner().update_spec)?;
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = DELETE,
    path = "/api/cis/tagging/tag/{tag_id}",
}]
pub async fn tag_delete(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<TagPath>,
) -> std::result::Result<HttpResponseDeleted, HttpError> {
    let mut state = authorize(&rqctx).await?;
    state.tags.delete_tag(&path.into_inner().tag_id)?;
    Ok(HttpResponseDeleted())
}

/// `action=attach|detach|list-attached-objects` on one tag.
#[endpoint {
    method = POST,
    path = "/api/cis/tagging/tag-association/{tag_id}",
}]
pub async fn association_tag(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<TagPath>,
    query: Query<ActionQuery>,
    body: UntypedBody,
) -> std::result::Result<HttpResponseOk<Value>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let id = path.into_inner().tag_id;
    let query = query.into_inner();
    let value = match action(&query) {
        "attach" => {
            let req: ObjectIdBody = decode(&body)?;
            let inv = rqctx.context().inventory.lock().await;
            state.tags.attach(&inv.registry, &id, &req.object_id)?;
            Value::Null
        }
        "detach" => {
            let req: ObjectIdBody = decode(&body)?;
            state.tags.detach(&id, &req.object_id)?;
            Value::Null
        }
        "list-attached-objects" => {
            let inv = rqctx.context().inventory.lock().await;
            let objects: Vec<DynamicId> = state
                .tags
                .attached_objects(&id)?
                .into_iter()
                .filter(|o| inv.registry.contains(&MoRef::from(o)))
                .collect();
            to_value(&objects)?
        }
        other => return Err(unknown_action(other).into()),
    };
    Ok(HttpResponseOk(value))
}

/// Association queries and batch operations spanning several tags or
/// objects.
#[endpoint {
    method = POST,
    path = "/api/cis/tagging/tag-association",
}]
pub async fn association(
    rqctx: RequestContext<Arc<Context>>,
    query: Query<ActionQuery>,
    body: UntypedBody,
) -> std::result::Result<HttpResponseOk<Value>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let query = query.into_inner();
    let value = match action(&query) {
        "list-attached-tags" => {
            let req: ObjectIdBody = decode(&body)?;
            to_value(&state.tags.attached_tags(&req.object_id))?
        }
        "list-attached-objects-on-tags" => {
            let req: TagIdsBody = decode(&body)?;
            let mut result = Vec::new();
            for tag_id in req.tag_ids {
                if let Ok(object_ids) = state.tags.attached_objects(&tag_id) {
                    result.push(TagToObjects { tag_id, object_ids });
                }
            }
            to_value(&result)?
        }
        "list-attached-tags-on-objects" => {
            let req: ObjectIdsBody = decode(&body)?;
            let result: Vec<ObjectToTags> = req
                .object_ids
                .into_iter()
                .map(|object_id| ObjectToTags {
                    tag_ids: state.tags.attached_tags(&object_id),
                    object_id,
                })
                .collect();
            to_value(&result)?
        }
        "attach-multiple-tags-to-object" => {
            let req: AttachMultipleTagsBody = decode(&body)?;
            let inv = rqctx.context().inventory.lock().await;
            let mut result = BatchResult { success: true, error_messages: Vec::new() };
            for tag in &req.tag_ids {
                if let Err(e) = state.tags.attach(&inv.registry, tag, &req.object_id) {
                    result.success = false;
                    result.error_messages.push(e.to_string());
                }
            }
            to_value(&result)?
        }
        "detach-multiple-tags-from-object" => {
            let req: AttachMultipleTagsBody = decode(&body)?;
            let mut result = BatchResult { success: true, error_messages: Vec::new() };
            for tag in &req.tag_ids {
                if let Err(e) = state.tags.detach(tag, &req.object_id) {
                    result.success = false;
                    result.error_messages.push(e.to_string());
                }
            }
            to_value(&result)?
        }
        other => return Err(unknown_action(other).into()),
    };
    Ok(HttpResponseOk(value))
}

fn to_value<T: serde::Serialize>(value: &T) -> VapiResult<Value> {
    serde_json::to_value(value).map_err(|e| Error::InvalidArgument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;
    use crate::vim::option::Settings;
    use vcsim_config_toml::Model;

    fn inventory() -> Inventory {
        let mut inv = Inventory::new(false, Settings::vpx());
        crate::model::populate(&mut inv, &Model::vpx()).unwrap();
        inv
    }

    fn category(store: &mut Store, name: &str, cardinality: Cardinality) -> String {
        store
            .create_category(CategoryCreateSpec {
                name: name.into(),
                cardinality,
                associable_types: vec!["VirtualMachine".into()],
                ..Default::default()
            })
            .unwrap()
    }

    fn tag(store: &mut Store, category: &str, name: &str) -> String {
        store
            .create_tag(TagCreateSpec {
                name: name.into(),
                category_id: category.into(),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn categories_and_tags() {
        let mut store = Store::default();
        let c = category(&mut store, "env", Cardinality::Multiple);
        assert!(c.starts_with("urn:vmomi:InventoryServiceCategory:"));
        let err = store
            .create_category(CategoryCreateSpec { name: "env".into(), ..Default::default() })
            .unwrap_err();
        assert_eq!(err, Error::AlreadyExists("env".into()));

        let t = tag(&mut store, &c, "prod");
        let err = store
            .create_tag(TagCreateSpec {
                name: "prod".into(),
                category_id: c.clone(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        let err = store
            .create_tag(TagCreateSpec {
                name: "x".into(),
                category_id: "bogus".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        assert_eq!(store.tags_for_category(&c).unwrap(), vec![t.clone()]);
        store
            .update_tag(&t, TagUpdateSpec { name: Some("production".into()), description: None })
            .unwrap();
        assert_eq!(store.tag(&t).unwrap().name, "production");
    }

    #[test]
    fn associable_types_only_grow() {
        let mut store = Store::default();
        let c = category(&mut store, "env", Cardinality::Single);
        let err = store
            .update_category(
                &c,
                CategoryUpdateSpec {
                    associable_types: Some(vec!["HostSystem".into()]),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        store
            .update_category(
                &c,
                CategoryUpdateSpec {
                    associable_types: Some(vec!["VirtualMachine".into(), "HostSystem".into()]),
                    cardinality: Some(Cardinality::Multiple),
                    ..Default::default()
                },
            )
            .unwrap();
        let category = store.category(&c).unwrap();
        assert_eq!(category.associable_types.len(), 2);
        assert_eq!(category.cardinality, Cardinality::Multiple);
    }

    #[test]
    fn attach_checks_object_type_and_cardinality() {
        let inv = inventory();
        let vm = DynamicId::from(&inv.registry.all_of("VirtualMachine")[0]);
        let host = DynamicId::from(&inv.registry.all_of("HostSystem")[0]);
        let mut store = Store::default();
        let c = category(&mut store, "owner", Cardinality::Single);
        let alice = tag(&mut store, &c, "alice");
        let bob = tag(&mut store, &c, "bob");

        store.attach(&inv.registry, &alice, &vm).unwrap();
        store.attach(&inv.registry, &alice, &vm).unwrap();
        assert!(matches!(
            store.attach(&inv.registry, &bob, &vm),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.attach(&inv.registry, &alice, &host),
            Err(Error::InvalidArgument(_))
        ));
        let ghost = DynamicId { kind: "VirtualMachine".into(), id: "vm-0".into() };
        assert!(matches!(
            store.attach(&inv.registry, &alice, &ghost),
            Err(Error::NotFound(_))
        ));

        assert_eq!(store.attached_objects(&alice).unwrap(), vec![vm.clone()]);
        assert_eq!(store.attached_tags(&vm), vec![alice.clone()]);
        store.detach(&alice, &vm).unwrap();
        store.attach(&inv.registry, &bob, &vm).unwrap();
        assert_eq!(store.attached_tags(&vm), vec![bob.clone()]);
    }

    #[test]
    fn deleting_a_category_cascades() {
        let inv = inventory();
        let vm = DynamicId::from(&inv.registry.all_of("VirtualMachine")[0]);
        let mut store = Store::default();
        let c = category(&mut store, "env", Cardinality::Multiple);
        let t = tag(&mut store, &c, "prod");
        store.attach(&inv.registry, &t, &vm).unwrap();

        store.delete_category(&c).unwrap();
        assert!(store.tags().is_empty());
        assert!(store.attached_tags(&vm).is_empty());
        assert!(matches!(store.tag(&t), Err(Error::NotFound(_))));
        assert!(matches!(store.delete_category(&c), Err(Error::NotFound(_))));
    }
}
