// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The property collector: retrieving object properties and waiting for
//! them to change.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use slog::debug;
use vim_api_types::methods::{
    CreateFilterRequest, RetrievePropertiesExRequest, TokenRequest,
    WaitForUpdatesExRequest,
};
use vim_api_types::property::{
    ObjectContent, ObjectSpec, ObjectUpdateKind, PropertyChange,
    PropertyFilterSpec, PropertySpec, RetrieveOptions, RetrieveResult,
    UpdateSet, WaitOptions,
};
use vim_api_types::MoRef;

use crate::{vim25, Error, Result};

/// A `PropertyCollector`: the endpoint's default one, or one created
/// for the session with [`Collector::create`].
#[derive(Clone)]
pub struct Collector {
    client: vim25::Client,
    this: MoRef,
}

impl Collector {
    /// The endpoint's default collector.
    pub fn new(client: &vim25::Client) -> Self {
        let this = client.service_content().property_collector.clone();
        Collector { client: client.clone(), this }
    }

    pub fn reference(&self) -> &MoRef {
        &self.this
    }

    /// Creates a collector private to the session, with its own filters
    /// and update versions.
    pub async fn create(&self) -> Result<Collector> {
        let this: MoRef =
            self.client.call(&self.this, "CreatePropertyCollector").await?;
        Ok(Collector { client: self.client.clone(), this })
    }

    /// Destroys a collector made by [`Collector::create`] and its filters.
    pub async fn destroy(&self) -> Result<()> {
        self.client.call(&self.this, "DestroyPropertyCollector").await
    }

    /// Retrieves every object matched by `specs`, following continuation
    /// tokens until the result is complete.
    pub async fn retrieve(&self, specs: Vec<PropertyFilterSpec>) -> Result<Vec<ObjectContent>> {
        self.retrieve_paged(specs, RetrieveOptions::default()).await
    }

    pub async fn retrieve_paged(
        &self,
        specs: Vec<PropertyFilterSpec>,
        options: RetrieveOptions,
    ) -> Result<Vec<ObjectContent>> {
        let req = RetrievePropertiesExRequest { spec_set: specs, options };
        let mut page: Option<RetrieveResult> =
            self.client.invoke(&self.this, "RetrievePropertiesEx", &req).await?;
        let mut objects = Vec::new();
        while let Some(result) = page.take() {
            objects.extend(result.objects);
            if let Some(token) = result.token {
                let req = TokenRequest { token };
                page = self
                    .client
                    .invoke(&self.this, "ContinueRetrievePropertiesEx", &req)
                    .await?;
            }
        }
        Ok(objects)
    }

    /// Retrieves `props` of the objects `objs`, all of the same type. An
    /// empty `props` retrieves every property.
    pub async fn retrieve_objects(
        &self,
        objs: &[MoRef],
        props: &[&str],
    ) -> Result<Vec<ObjectContent>> {
        let Some(first) = objs.first() else {
            return Ok(Vec::new());
        };
        let prop = match props {
            [] => PropertySpec::all(first.kind.clone()),
            props => PropertySpec::new(first.kind.clone(), props),
        };
        let spec = PropertyFilterSpec {
            prop_set: vec![prop],
            object_set: objs.iter().cloned().map(ObjectSpec::new).collect(),
            report_missing_objects_in_results: None,
        };
        self.retrieve(vec![spec]).await
    }

    pub async fn retrieve_one(&self, obj: &MoRef, props: &[&str]) -> Result<ObjectContent> {
        self.retrieve_objects(std::slice::from_ref(obj), props)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound { kind: "object", path: obj.to_string() })
    }

    /// Retrieves `props` of `obj` into `T`, nesting dotted property paths.
    pub async fn retrieve_into<T: DeserializeOwned>(
        &self,
        obj: &MoRef,
        props: &[&str],
    ) -> Result<T> {
        let content = self.retrieve_one(obj, props).await?;
        Ok(serde_json::from_value(to_object(&content))?)
    }

    pub async fn create_filter(
        &self,
        spec: PropertyFilterSpec,
        partial_updates: bool,
    ) -> Result<MoRef> {
        let req = CreateFilterRequest { spec, partial_updates };
        self.client.invoke(&self.this, "CreateFilter", &req).await
    }

    pub async fn destroy_filter(&self, filter: &MoRef) -> Result<()> {
        self.client.call(filter, "DestroyPropertyFilter").await
    }

    /// Waits for changes since `version`. `None` is returned when the
    /// configured wait elapses without changes.
    pub async fn wait_for_updates_ex(
        &self,
        version: Option<&str>,
        options: WaitOptions,
    ) -> Result<Option<UpdateSet>> {
        let req = WaitForUpdatesExRequest {
            version: version.map(str::to_string),
            options: Some(options),
        };
        self.client.invoke(&self.this, "WaitForUpdatesEx", &req).await
    }

    /// Returns pending changes since `version` without blocking.
    pub async fn check_for_updates(&self, version: Option<&str>) -> Result<Option<UpdateSet>> {
        let req = WaitForUpdatesExRequest {
            version: version.map(str::to_string),
            options: None,
        };
        self.client.invoke(&self.this, "CheckForUpdates", &req).await
    }

    /// Interrupts a pending wait, which then fails with `RequestCanceled`.
    pub async fn cancel_wait_for_updates(&self) -> Result<()> {
        self.client.call(&self.this, "CancelWaitForUpdates").await
    }
}

/// Folds the collected properties of `content` into one JSON object, so
/// `runtime.powerState` becomes `{"runtime": {"powerState": ...}}`.
pub fn to_object(content: &ObjectContent) -> Value {
    let mut root = Map::new();
    for prop in &content.prop_set {
        insert(&mut root, &prop.name, prop.val.clone());
    }
    Value::Object(root)
}

fn insert(node: &mut Map<String, Value>, path: &str, val: Value) {
    let Some((head, rest)) = path.split_once('.') else {
        node.insert(path.to_string(), val);
        return;
    };
    let child = node
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    match child {
        Value::Object(map) => insert(map, rest, val),
        other => {
            let mut map = Map::new();
            insert(&mut map, rest, val);
            *other = Value::Object(map);
        }
    }
}

/// Watches `props` of `obj` on a private collector until `done` accepts a
/// change set. The first change set holds the current values.
pub async fn wait<F>(
    collector: &Collector,
    obj: &MoRef,
    props: &[&str],
    mut done: F,
) -> Result<()>
where
    F: FnMut(&[PropertyChange]) -> bool,
{
    let pc = collector.create().await?;
    let result = watch(&pc, obj, props, &mut done).await;
    if let Err(e) = pc.destroy().await {
        debug!(collector.client.log(), "collector cleanup failed"; "error" => %e);
    }
    result
}

async fn watch<F>(pc: &Collector, obj: &MoRef, props: &[&str], done: &mut F) -> Result<()>
where
    F: FnMut(&[PropertyChange]) -> bool,
{
    let spec = PropertyFilterSpec {
        prop_set: vec![PropertySpec::new(obj.kind.clone(), props)],
        object_set: vec![ObjectSpec::new(obj.clone())],
        report_missing_objects_in_results: None,
    };
    pc.create_filter(spec, false).await?;
    let mut version: Option<String> = None;
    loop {
        let set = pc
            .wait_for_updates_ex(version.as_deref(), WaitOptions::default())
            .await?;
        let Some(set) = set else { continue };
        version = Some(set.version);
        for update in set.filter_set.iter().flat_map(|f| &f.object_set) {
            if update.kind == ObjectUpdateKind::Leave {
                return Err(Error::NotFound { kind: "object", path: obj.to_string() });
            }
            if done(&update.change_set) {
                return Ok(());
            }
        }
    }
}
