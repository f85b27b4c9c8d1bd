// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Views: session-scoped sets of inventory objects the property collector
//! can traverse.

use vim_api_types::methods::{
    CreateContainerViewRequest, ListViewRequest, ModifyListViewRequest,
};
use vim_api_types::property::{
    ObjectContent, ObjectSpec, PropertyFilterSpec, PropertySpec,
    SelectionSpec, TraversalSpec,
};
use vim_api_types::MoRef;

use crate::{property, vim25, Error, Result};

/// The `ViewManager`.
#[derive(Clone)]
pub struct Manager {
    client: vim25::Client,
    this: MoRef,
}

impl Manager {
    pub fn new(client: &vim25::Client) -> Result<Self> {
        let this = client
            .service_content()
            .view_manager
            .clone()
            .ok_or(Error::Unsupported("view manager"))?;
        Ok(Manager { client: client.clone(), this })
    }

    /// A view of the objects of `kinds` inside `container`; every
    /// descendant when `recursive`, direct children otherwise.
    pub async fn create_container_view(
        &self,
        container: &MoRef,
        kinds: &[&str],
        recursive: bool,
    ) -> Result<ContainerView> {
        let req = CreateContainerViewRequest {
            container: container.clone(),
            kind: kinds.iter().map(|k| k.to_string()).collect(),
            recursive,
        };
        let this = self.client.invoke(&self.this, "CreateContainerView", &req).await?;
        Ok(ContainerView { client: self.client.clone(), this })
    }

    pub async fn create_list_view(&self, objs: &[MoRef]) -> Result<ListView> {
        let req = ListViewRequest { obj: objs.to_vec() };
        let this = self.client.invoke(&self.this, "CreateListView", &req).await?;
        Ok(ListView { client: self.client.clone(), this })
    }

    /// A list view holding the current members of `view`.
    pub async fn create_list_view_from_view(&self, view: &MoRef) -> Result<ListView> {
        let req = serde_json::json!({ "view": view });
        let this = self.client.invoke(&self.this, "CreateListViewFromView", &req).await?;
        Ok(ListView { client: self.client.clone(), this })
    }
}

/// Spec collecting `props` of the `kind` members of `view`.
fn members(view: &MoRef, kind: &str, props: &[&str]) -> PropertyFilterSpec {
    let prop = match props {
        [] => PropertySpec::all(kind),
        props => PropertySpec::new(kind, props),
    };
    PropertyFilterSpec {
        prop_set: vec![prop],
        object_set: vec![ObjectSpec {
            obj: view.clone(),
            skip: Some(true),
            select_set: vec![SelectionSpec::TraversalSpec(TraversalSpec {
                name: Some("traverseEntities".into()),
                kind: view.kind.clone(),
                path: "view".into(),
                skip: Some(false),
                select_set: Vec::new(),
            })],
        }],
        report_missing_objects_in_results: None,
    }
}

#[derive(Clone)]
pub struct ContainerView {
    client: vim25::Client,
    this: MoRef,
}

impl ContainerView {
    pub fn reference(&self) -> &MoRef {
        &self.this
    }

    /// Retrieves `props` of the view's members of type `kind`.
    pub async fn retrieve(&self, kind: &str, props: &[&str]) -> Result<Vec<ObjectContent>> {
        property::Collector::new(&self.client)
            .retrieve(vec![members(&self.this, kind, props)])
            .await
    }

    /// References to the view's members of type `kind`.
    pub async fn find(&self, kind: &str) -> Result<Vec<MoRef>> {
        let found = self.retrieve(kind, &["name"]).await?;
        Ok(found.into_iter().map(|o| o.obj).collect())
    }

    pub async fn destroy(&self) -> Result<()> {
        self.client.call(&self.this, "DestroyView").await
    }
}

#[derive(Clone)]
pub struct ListView {
    client: vim25::Client,
    this: MoRef,
}

impl ListView {
    pub fn reference(&self) -> &MoRef {
        &self.this
    }

    pub async fn view(&self) -> Result<Vec<MoRef>> {
        let view: Option<Vec<MoRef>> = self.client.property(&self.this, "view").await?;
        Ok(view.unwrap_or_default())
    }

    /// Adds and removes members, returning the additions that no longer
    /// exist.
    pub async fn modify(&self, add: &[MoRef], remove: &[MoRef]) -> Result<Vec<MoRef>> {
        let req = ModifyListViewRequest { add: add.to_vec(), remove: remove.to_vec() };
        let missing: Option<Vec<MoRef>> =
            self.client.invoke(&self.this, "ModifyListView", &req).await?;
        Ok(missing.unwrap_or_default())
    }

    /// Replaces the members, returning those that no longer exist.
    pub async fn reset(&self, objs: &[MoRef]) -> Result<Vec<MoRef>> {
        let req = ListViewRequest { obj: objs.to_vec() };
        let missing: Option<Vec<MoRef>> =
            self.client.invoke(&self.this, "ResetListView", &req).await?;
        Ok(missing.unwrap_or_default())
    }

    pub async fn retrieve(&self, kind: &str, props: &[&str]) -> Result<Vec<ObjectContent>> {
        property::Collector::new(&self.client)
            .retrieve(vec![members(&self.this, kind, props)])
            .await
    }

    pub async fn destroy(&self) -> Result<()> {
        self.client.call(&self.this, "DestroyView").await
    }
}
