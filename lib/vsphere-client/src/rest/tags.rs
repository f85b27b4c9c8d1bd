// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tag categories, tags and their attachment to inventory objects.

use vim_api_types::vapi::tags::{
    AttachMultipleTagsBody, BatchResult, Category, CategoryCreate,
    CategoryCreateSpec, CategoryIdBody, CategoryUpdate, CategoryUpdateSpec,
    DynamicId, ObjectIdBody, ObjectIdsBody, ObjectToTags, Tag, TagCreate,
    TagCreateSpec, TagIdsBody, TagToObjects, TagUpdate, TagUpdateSpec,
};
use vim_api_types::MoRef;

use super::{not_found, Client};
use crate::{segment, Error, Result};

const CATEGORY: &str = "/api/cis/tagging/category";
const TAG: &str = "/api/cis/tagging/tag";
const ASSOCIATION: &str = "/api/cis/tagging/tag-association";

/// Ids look like `urn:vmomi:InventoryServiceTag:...`; anything else is
/// taken as a name.
fn is_id(s: &str) -> bool {
    s.starts_with("urn:vmomi:")
}

#[derive(Clone)]
pub struct Manager {
    client: Client,
}

impl Manager {
    pub fn new(client: &Client) -> Self {
        Manager { client: client.clone() }
    }

    pub async fn create_category(&self, spec: CategoryCreateSpec) -> Result<String> {
        self.client.post(CATEGORY, None, &CategoryCreate { create_spec: spec }).await
    }

    /// Ids of every category.
    pub async fn list_categories(&self) -> Result<Vec<String>> {
        self.client.get(CATEGORY, &[]).await
    }

    pub async fn categories(&self) -> Result<Vec<Category>> {
        let mut all = Vec::new();
        for id in self.list_categories().await? {
            all.push(self.category_by_id(&id).await?);
        }
        Ok(all)
    }

    /// A category by id or name.
    pub async fn category(&self, id: &str) -> Result<Category> {
        if is_id(id) {
            return self.category_by_id(id).await;
        }
        self.categories()
            .await?
            .into_iter()
            .find(|c| c.name == id)
            .ok_or_else(|| Error::NotFound { kind: "category", path: id.to_string() })
    }

    async fn category_by_id(&self, id: &str) -> Result<Category> {
        self.client
            .get(&format!("{CATEGORY}/{}", segment(id)), &[])
            .await
            .map_err(not_found("category", id))
    }

    pub async fn update_category(&self, id: &str, spec: CategoryUpdateSpec) -> Result<()> {
        let id = self.category(id).await?.id;
        self.client
            .patch(&format!("{CATEGORY}/{}", segment(&id)), &CategoryUpdate { update_spec: spec })
            .await
    }

    /// Deletes a category and the tags in it.
    pub async fn delete_category(&self, id: &str) -> Result<()> {
        let id = self.category(id).await?.id;
        self.client.delete(&format!("{CATEGORY}/{}", segment(&id))).await
    }

    pub async fn create_tag(&self, spec: TagCreateSpec) -> Result<String> {
        self.client.post(TAG, None, &TagCreate { create_spec: spec }).await
    }

    pub async fn list_tags(&self) -> Result<Vec<String>> {
        self.client.get(TAG, &[]).await
    }

    pub async fn tags(&self) -> Result<Vec<Tag>> {
        let mut all = Vec::new();
        for id in self.list_tags().await? {
            all.push(self.tag_by_id(&id).await?);
        }
        Ok(all)
    }

    /// A tag by id or name. Tag names are only unique within a category, so
    /// a name shared by several tags is an error.
    pub async fn tag(&self, id: &str) -> Result<Tag> {
        if is_id(id) {
            return self.tag_by_id(id).await;
        }
        let mut found: Vec<Tag> =
            self.tags().await?.into_iter().filter(|t| t.name == id).collect();
        match found.len() {
            0 => Err(Error::NotFound { kind: "tag", path: id.to_string() }),
            1 => Ok(found.remove(0)),
            _ => Err(Error::Multiple { kind: "tag", path: id.to_string() }),
        }
    }

    async fn tag_by_id(&self, id: &str) -> Result<Tag> {
        self.client
            .get(&format!("{TAG}/{}", segment(id)), &[])
            .await
            .map_err(not_found("tag", id))
    }

    /// Ids of the tags in `category`, given by id or name.
    pub async fn list_tags_for_category(&self, category: &str) -> Result<Vec<String>> {
        let category_id = self.category(category).await?.id;
        self.client
            .post(TAG, Some("list-tags-for-category"), &CategoryIdBody { category_id })
            .await
    }

    pub async fn tags_for_category(&self, category: &str) -> Result<Vec<Tag>> {
        let mut all = Vec::new();
        for id in self.list_tags_for_category(category).await? {
            all.push(self.tag_by_id(&id).await?);
        }
        Ok(all)
    }

    pub async fn update_tag(&self, id: &str, spec: TagUpdateSpec) -> Result<()> {
        let id = self.tag(id).await?.id;
        self.client
            .patch(&format!("{TAG}/{}", segment(&id)), &TagUpdate { update_spec: spec })
            .await
    }

    pub async fn delete_tag(&self, id: &str) -> Result<()> {
        let id = self.tag(id).await?.id;
        self.client.delete(&format!("{TAG}/{}", segment(&id))).await
    }

    /// Attaches tag `id` to `object`. A category with single cardinality
    /// admits one of its tags per object.
    pub async fn attach_tag(&self, id: &str, object: &MoRef) -> Result<()> {
        let id = self.tag(id).await?.id;
        let body = ObjectIdBody { object_id: DynamicId::from(object) };
        self.client
            .post(&format!("{ASSOCIATION}/{}", segment(&id)), Some("attach"), &body)
            .await
    }

    pub async fn detach_tag(&self, id: &str, object: &MoRef) -> Result<()> {
        let id = self.tag(id).await?.id;
        let body = ObjectIdBody { object_id: DynamicId::from(object) };
        self.client
            .post(&format!("{ASSOCIATION}/{}", segment(&id)), Some("detach"), &body)
            .await
    }

    pub async fn attached_objects(&self, id: &str) -> Result<Vec<MoRef>> {
        let id = self.tag(id).await?.id;
        let found: Vec<DynamicId> = self
            .client
            .post(
                &format!("{ASSOCIATION}/{}", segment(&id)),
                Some("list-attached-objects"),
                &serde_json::json!({}),
            )
            .await?;
        Ok(found.iter().map(MoRef::from).collect())
    }

    /// Ids of the tags attached to `object`.
    pub async fn list_attached_tags(&self, object: &MoRef) -> Result<Vec<String>> {
        let body = ObjectIdBody { object_id: DynamicId::from(object) };
        self.client.post(ASSOCIATION, Some("list-attached-tags"), &body).await
    }

    pub async fn attached_tags(&self, object: &MoRef) -> Result<Vec<Tag>> {
        let mut all = Vec::new();
        for id in self.list_attached_tags(object).await? {
            all.push(self.tag_by_id(&id).await?);
        }
        Ok(all)
    }

    pub async fn attached_objects_on_tags(&self, tag_ids: &[String]) -> Result<Vec<TagToObjects>> {
        let body = TagIdsBody { tag_ids: tag_ids.to_vec() };
        self.client.post(ASSOCIATION, Some("list-attached-objects-on-tags"), &body).await
    }

    pub async fn attached_tags_on_objects(&self, objects: &[MoRef]) -> Result<Vec<ObjectToTags>> {
        let body = ObjectIdsBody { object_ids: objects.iter().map(DynamicId::from).collect() };
        self.client.post(ASSOCIATION, Some("list-attached-tags-on-objects"), &body).await
    }

    /// Attaches several tags, by id, to `object`; failures are reported in
    /// the result rather than as an error.
    pub async fn attach_multiple_tags(&self, tag_ids: &[String], object: &MoRef) -> Result<BatchResult> {
        let body = AttachMultipleTagsBody {
            object_id: DynamicId::from(object),
            tag_ids: tag_ids.to_vec(),
        };
        self.client.post(ASSOCIATION, Some("attach-multiple-tags-to-object"), &body).await
    }

    pub async fn detach_multiple_tags(&self, tag_ids: &[String], object: &MoRef) -> Result<BatchResult> {
        let body = AttachMultipleTagsBody {
            object_id: DynamicId::from(object),
            tag_ids: tag_ids.to_vec(),
        };
        self.client.post(ASSOCIATION, Some("detach-multiple-tags-from-object"), &body).await
    }
}
