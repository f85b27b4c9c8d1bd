// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Content libraries and their items.
//!
//! A local library may be published at
//! `{base}/cls/vcsp/lib/{id}/lib.json`. Subscribed libraries name that URL
//! and mirror the publisher's items, matching them by `source_id`. Items
//! of an on-demand subscription carry metadata only until their content is
//! synchronized.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use dropshot::{
    endpoint, HttpError, HttpResponseDeleted, HttpResponseOk,
    HttpResponseUpdatedNoContent, Path, Query, RequestContext, TypedBody,
    UntypedBody,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use slog::{o, warn, Logger};
use vim_api_types::vapi::library::{
    AuthenticationMethod, Item, ItemCreate, ItemCreateSpec, ItemFile, ItemFind,
    ItemFindBody, ItemSyncBody, ItemUpdate, ItemUpdateSpec, Library,
    LibraryFind, LibraryFindBody, LibraryItemQuery, LibraryType, LibraryUpdate,
    LibraryUpdateSpec, LocalLibraryCreate, LocalLibraryCreateSpec, PublishInfo,
    SubscribedLibraryCreate, SubscribedLibraryCreateSpec, SubscriptionInfo,
};
use vim_api_types::vapi::ActionQuery;

use super::{
    action, authorize, basic_credentials, decode, decode_or_default,
    unknown_action, Error, VapiResult,
};
use crate::Context;

const PUBLISH_PATH: &str = "/cls/vcsp/lib/";

/// Content of one file of an item; `data` is `None` until cached.
#[derive(Clone, Debug)]
pub struct File {
    pub size: i64,
    pub version: u64,
    pub data: Option<Bytes>,
}

#[derive(Clone, Debug)]
pub struct StoredItem {
    pub info: Item,
    pub files: BTreeMap<String, File>,
}

pub struct Store {
    libraries: BTreeMap<String, Library>,
    items: BTreeMap<String, StoredItem>,
    log: Logger,
}

impl Default for Store {
    fn default() -> Self {
        Store::new(Logger::root(slog::Discard, o!()))
    }
}

fn bump(version: &mut String) {
    let next = version.parse::<u64>().unwrap_or(0) + 1;
    *version = next.to_string();
}

fn publish_url(base: &str, id: &str) -> String {
    format!("{base}{PUBLISH_PATH}{id}/lib.json")
}

/// Extracts the library id from a publish URL.
fn published_id(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once(PUBLISH_PATH)?;
    let (id, file) = rest.split_once('/')?;
    (file == "lib.json" && !id.is_empty()).then_some(id)
}

fn copy_files(files: &BTreeMap<String, File>, cache: bool) -> BTreeMap<String, File> {
    files
        .iter()
        .map(|(name, f)| {
            let data = if cache { f.data.clone() } else { None };
            (name.clone(), File { size: f.size, version: f.version, data })
        })
        .collect()
}

impl Store {
    pub fn new(log: Logger) -> Self {
        Store { libraries: BTreeMap::new(), items: BTreeMap::new(), log }
    }

    fn check_name(&self, name: &str, except: Option<&str>) -> VapiResult<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("name".into()));
        }
        if self
            .libraries
            .values()
            .any(|l| l.name == name && Some(l.id.as_str()) != except)
        {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    fn new_library(
        id: &str,
        name: String,
        description: String,
        kind: LibraryType,
    ) -> Library {
        let now = Utc::now();
        Library {
            id: id.to_string(),
            name,
            description,
            kind,
            storage_backings: Vec::new(),
            version: "1".to_string(),
            creation_time: now,
            last_modified_time: now,
            last_sync_time: None,
            publish_info: None,
            subscription_info: None,
        }
    }

    pub fn create_local(&mut self, spec: LocalLibraryCreateSpec, base: &str) -> VapiResult<String> {
        self.check_name(&spec.name, None)?;
        let id = uuid::Uuid::new_v4().to_string();
        let mut library =
            Self::new_library(&id, spec.name, spec.description, LibraryType::Local);
        library.storage_backings = spec.storage_backings;
        library.publish_info = spec.publish_info.map(|p| Self::publishing(p, base, &id));
        self.libraries.insert(id.clone(), library);
        Ok(id)
    }

    fn publishing(mut info: PublishInfo, base: &str, id: &str) -> PublishInfo {
        info.publish_url = info.published.then(|| publish_url(base, id));
        info
    }

    /// Creates a subscribed library and synchronizes it with its publisher.
    pub fn create_subscribed(&mut self, spec: SubscribedLibraryCreateSpec) -> VapiResult<String> {
        self.check_name(&spec.name, None)?;
        self.publisher(&spec.subscription_info)?;
        let id = uuid::Uuid::new_v4().to_string();
        let mut library =
            Self::new_library(&id, spec.name, spec.description, LibraryType::Subscribed);
        library.storage_backings = spec.storage_backings;
        library.subscription_info = Some(spec.subscription_info);
        self.libraries.insert(id.clone(), library);
        self.sync_library(&id)?;
        Ok(id)
    }

    pub fn libraries(&self) -> Vec<String> {
        self.libraries.keys().cloned().collect()
    }

    pub fn libraries_of(&self, kind: LibraryType) -> Vec<String> {
        self.libraries
            .values()
            .filter(|l| l.kind == kind)
            .map(|l| l.id.clone())
            .collect()
    }

    pub fn library(&self, id: &str) -> VapiResult<&Library> {
        self.libraries
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("library {id}")))
    }

    fn library_mut(&mut self, id: &str) -> VapiResult<&mut Library> {
        self.libraries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("library {id}")))
    }

    pub fn find(&self, spec: &LibraryFind) -> Vec<String> {
        self.libraries
            .values()
            .filter(|l| spec.name.as_ref().map_or(true, |n| &l.name == n))
            .filter(|l| spec.kind.map_or(true, |k| l.kind == k))
            .map(|l| l.id.clone())
            .collect()
    }

    pub fn update(&mut self, id: &str, spec: LibraryUpdateSpec, base: &str) -> VapiResult<()> {
        let kind = self.library(id)?.kind;
        if let Some(name) = &spec.name {
            self.check_name(name, Some(id))?;
        }
        if spec.publish_info.is_some() && kind == LibraryType::Subscribed {
            return Err(Error::InvalidArgument(
                "a subscribed library cannot be published".into(),
            ));
        }
        let library = self.library_mut(id)?;
        if let Some(name) = spec.name {
            library.name = name;
        }
        if let Some(description) = spec.description {
            library.description = description;
        }
        if let Some(info) = spec.publish_info {
            library.publish_info = Some(Self::publishing(info, base, id));
        }
        library.last_modified_time = Utc::now();
        bump(&mut library.version);
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> VapiResult<()> {
        self.libraries
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("library {id}")))?;
        self.items.retain(|_, item| item.info.library_id != id);
        Ok(())
    }

    /// Resolves the published library a subscription refers to, checking
    /// the subscription's credentials.
    pub fn publisher(&self, sub: &SubscriptionInfo) -> VapiResult<String> {
        let invalid = || Error::InvalidArgument(format!(
            "subscription_url {}",
            sub.subscription_url
        ));
        let id = published_id(&sub.subscription_url).ok_or_else(invalid)?;
        let library = self.libraries.get(id).ok_or_else(invalid)?;
        let Some(info) = library.publish_info.as_ref().filter(|p| p.published) else {
            return Err(invalid());
        };
        if info.authentication_method == AuthenticationMethod::Basic
            && (sub.authentication_method != AuthenticationMethod::Basic
                || sub.user_name != info.user_name
                || sub.password != info.password)
        {
            return Err(Error::Inaccessible(sub.subscription_url.clone()));
        }
        Ok(id.to_string())
    }

    fn subscription(&self, id: &str) -> VapiResult<&SubscriptionInfo> {
        self.library(id)?.subscription_info.as_ref().ok_or_else(|| {
            Error::NotAllowed(format!("library {id} is not a subscribed library"))
        })
    }

    /// Subscribed libraries whose subscription resolves to `publisher`.
    fn subscribers(&self, publisher: &str) -> Vec<(String, bool)> {
        self.libraries
            .values()
            .filter_map(|l| {
                let sub = l.subscription_info.as_ref()?;
                (published_id(&sub.subscription_url) == Some(publisher))
                    .then(|| (l.id.clone(), sub.automatic_sync_enabled))
            })
            .collect()
    }

    /// Brings subscribed library `id` in line with its publisher.
    pub fn sync_library(&mut self, id: &str) -> VapiResult<()> {
        let sub = self.subscription(id)?.clone();
        let publisher = self.publisher(&sub)?;
        let cache = !sub.on_demand;
        let now = Utc::now();

        let sources: BTreeMap<String, StoredItem> = self
            .items
            .iter()
            .filter(|(_, item)| item.info.library_id == publisher)
            .map(|(k, item)| (k.clone(), item.clone()))
            .collect();
        self.items.retain(|_, item| {
            item.info.library_id != id
                || item.info.source_id.as_ref().is_some_and(|s| sources.contains_key(s))
        });

        for (source_id, source) in &sources {
            let existing = self
                .items
                .values_mut()
                .find(|i| i.info.library_id == id && i.info.source_id.as_ref() == Some(source_id));
            match existing {
                Some(item) => {
                    if item.info.content_version != source.info.content_version
                        || item.info.metadata_version != source.info.metadata_version
                    {
                        item.info.name = source.info.name.clone();
                        item.info.description = source.info.description.clone();
                        item.info.kind = source.info.kind.clone();
                        item.info.size = source.info.size;
                        item.info.content_version = source.info.content_version.clone();
                        item.info.metadata_version = source.info.metadata_version.clone();
                        item.info.last_modified_time = now;
                        item.info.cached = cache;
                        item.files = copy_files(&source.files, cache);
                    }
                    item.info.last_sync_time = Some(now);
                }
                None => {
                    let item_id = uuid::Uuid::new_v4().to_string();
                    let mut info = source.info.clone();
                    info.id = item_id.clone();
                    info.library_id = id.to_string();
                    info.source_id = Some(source_id.clone());
                    info.cached = cache;
                    info.creation_time = now;
                    info.last_sync_time = Some(now);
                    let files = copy_files(&source.files, cache);
                    self.items.insert(item_id, StoredItem { info, files });
                }
            }
        }

        let library = self.library_mut(id)?;
        library.last_sync_time = Some(now);
        bump(&mut library.version);
        Ok(())
    }

    /// Re-synchronizes every subscriber of published library `id`.
    pub fn publish(&mut self, id: &str) -> VapiResult<()> {
        let library = self.library(id)?;
        if !library.publish_info.as_ref().is_some_and(|p| p.published) {
            return Err(Error::NotAllowed(format!("library {id} is not published")));
        }
        for (sub, _) in self.subscribers(id) {
            self.sync_library(&sub)?;
        }
        Ok(())
    }

    /// Synchronizes the automatically synchronized subscribers of `id`
    /// after its content changed. Subscribers that can no longer reach the
    /// publisher are left as they are.
    fn content_changed(&mut self, id: &str) {
        for (sub, automatic) in self.subscribers(id) {
            if !automatic {
                continue;
            }
            if let Err(e) = self.sync_library(&sub) {
                warn!(self.log, "subscriber left out of sync";
                    "library" => &sub, "publisher" => id, "error" => %e);
            }
        }
    }

    /// Drops the cached content of on-demand subscribed library `id`.
    pub fn evict(&mut self, id: &str) -> VapiResult<()> {
        if !self.subscription(id)?.on_demand {
            return Err(Error::NotAllowed(format!(
                "library {id} does not synchronize on demand"
            )));
        }
        for item in self.items.values_mut().filter(|i| i.info.library_id == id) {
            item.info.cached = false;
            for file in item.files.values_mut() {
                file.data = None;
            }
        }
        Ok(())
    }

    pub fn writable(&self, library: &str) -> VapiResult<()> {
        match self.library(library)?.kind {
            LibraryType::Local => Ok(()),
            LibraryType::Subscribed => Err(Error::NotAllowed(format!(
                "library {library} is a subscribed library"
            ))),
        }
    }

    pub fn create_item(&mut self, spec: ItemCreateSpec) -> VapiResult<String> {
        self.writable(&spec.library_id)?;
        if spec.name.is_empty() {
            return Err(Error::InvalidArgument("create_spec.name".into()));
        }
        if self
            .items
            .values()
            .any(|i| i.info.library_id == spec.library_id && i.info.name == spec.name)
        {
            return Err(Error::AlreadyExists(spec.name));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let library = spec.library_id.clone();
        self.items.insert(
            id.clone(),
            StoredItem {
                info: Item {
                    id: id.clone(),
                    library_id: spec.library_id,
                    name: spec.name,
                    description: spec.description,
                    kind: spec.kind,
                    size: 0,
                    cached: false,
                    content_version: "1".to_string(),
                    metadata_version: "1".to_string(),
                    source_id: None,
                    creation_time: now,
                    last_modified_time: now,
                    last_sync_time: None,
                },
                files: BTreeMap::new(),
            },
        );
        self.content_changed(&library);
        Ok(id)
    }

    pub fn items(&self, library: &str) -> VapiResult<Vec<String>> {
        self.library(library)?;
        Ok(self
            .items
            .values()
            .filter(|i| i.info.library_id == library)
            .map(|i| i.info.id.clone())
            .collect())
    }

    pub fn item(&self, id: &str) -> VapiResult<&StoredItem> {
        self.items
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("library item {id}")))
    }

    fn item_mut(&mut self, id: &str) -> VapiResult<&mut StoredItem> {
        self.items
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("library item {id}")))
    }

    pub fn find_items(&self, spec: &ItemFind) -> Vec<String> {
        self.items
            .values()
            .map(|i| &i.info)
            .filter(|i| spec.library_id.as_ref().map_or(true, |l| &i.library_id == l))
            .filter(|i| spec.name.as_ref().map_or(true, |n| &i.name == n))
            .filter(|i| spec.kind.as_ref().map_or(true, |k| &i.kind == k))
            .filter(|i| spec.source_id.as_ref().map_or(true, |s| i.source_id.as_ref() == Some(s)))
            .filter(|i| spec.cached.map_or(true, |c| i.cached == c))
            .map(|i| i.id.clone())
            .collect()
    }

    pub fn update_item(&mut self, id: &str, spec: ItemUpdateSpec) -> VapiResult<()> {
        let library = self.item(id)?.info.library_id.clone();
        self.writable(&library)?;
        if let Some(name) = &spec.name {
            if self
                .items
                .values()
                .any(|i| i.info.library_id == library && &i.info.name == name && i.info.id != id)
            {
                return Err(Error::AlreadyExists(name.clone()));
            }
        }
        let item = self.item_mut(id)?;
        if let Some(name) = spec.name {
            item.info.name = name;
        }
        if let Some(description) = spec.description {
            item.info.description = description;
        }
        item.info.last_modified_time = Utc::now();
        bump(&mut item.info.metadata_version);
        self.content_changed(&library);
        Ok(())
    }

    pub fn delete_item(&mut self, id: &str) -> VapiResult<()> {
        let library = self.item(id)?.info.library_id.clone();
        self.writable(&library)?;
        self.items.remove(id);
        self.content_changed(&library);
        Ok(())
    }

    /// Fetches the content of subscribed item `id` from its publisher.
    pub fn sync_item(&mut self, id: &str, force: bool) -> VapiResult<()> {
        let item = self.item(id)?;
        if item.info.cached && !force {
            return Ok(());
        }
        let library = item.info.library_id.clone();
        let source_id = item.info.source_id.clone();
        let sub = self.subscription(&library)?.clone();
        self.publisher(&sub)?;
        let source = source_id
            .and_then(|s| self.items.get(&s))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("source of library item {id}")))?;
        let item = self.item_mut(id)?;
        item.files = copy_files(&source.files, true);
        item.info.size = source.info.size;
        item.info.content_version = source.info.content_version;
        item.info.cached = true;
        item.info.last_sync_time = Some(Utc::now());
        Ok(())
    }

    /// Makes sure the content of item `id` is available locally.
    pub fn ensure_cached(&mut self, id: &str) -> VapiResult<()> {
        let item = self.item(id)?;
        if item.info.cached || item.info.source_id.is_none() {
            return Ok(());
        }
        self.sync_item(id, false)
    }

    pub fn files(&self, id: &str) -> VapiResult<Vec<ItemFile>> {
        let item = self.item(id)?;
        Ok(item
            .files
            .iter()
            .map(|(name, f)| ItemFile {
                name: name.clone(),
                size: f.size,
                cached: f.data.is_some(),
                version: f.version.to_string(),
            })
            .collect())
    }

    /// Stores uploaded files in local item `id` as a new content version.
    pub fn apply_files(&mut self, id: &str, files: Vec<(String, Bytes)>) -> VapiResult<()> {
        let library = self.item(id)?.info.library_id.clone();
        self.writable(&library)?;
        let item = self.item_mut(id)?;
        for (name, data) in files {
            let version = item.files.get(&name).map_or(1, |f| f.version + 1);
            let size = data.len() as i64;
            item.files.insert(name, File { size, version, data: Some(data) });
        }
        item.info.size = item.files.values().map(|f| f.size).sum();
        item.info.cached = true;
        item.info.last_modified_time = Utc::now();
        bump(&mut item.info.content_version);
        let library_entry = self.library_mut(&library)?;
        library_entry.last_modified_time = Utc::now();
        bump(&mut library_entry.version);
        self.content_changed(&library);
        Ok(())
    }

    /// Removes file `name` from local item `id`.
    pub fn remove_file(&mut self, id: &str, name: &str) -> VapiResult<()> {
        let library = self.item(id)?.info.library_id.clone();
        self.writable(&library)?;
        let item = self.item_mut(id)?;
        item.files
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("file {name}")))?;
        item.info.size = item.files.values().map(|f| f.size).sum();
        bump(&mut item.info.content_version);
        self.content_changed(&library);
        Ok(())
    }

    /// Content of file `name` of item `id`, if cached.
    pub fn data(&self, id: &str, name: &str) -> VapiResult<Bytes> {
        self.item(id)?
            .files
            .get(name)
            .and_then(|f| f.data.clone())
            .ok_or_else(|| Error::NotFound(format!("file {name}")))
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct LibraryPath {
    library_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct ItemPath {
    item_id: String,
}

#[endpoint {
    method = GET,
    path = "/api/content/library",
}]
pub async fn library_list(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<Vec<String>>, HttpError> {
    let state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.library.libraries()))
}

/// `action=find` over every library.
#[endpoint {
    method = POST,
    path = "/api/content/library",
}]
pub async fn library_find(
    rqctx: RequestContext<Arc<Context>>,
    query: Query<ActionQuery>,
    body: TypedBody<LibraryFindBody>,
) -> std::result::Result<HttpResponseOk<Vec<String>>, HttpError> {
    let state = authorize(&rqctx).await?;
    let query = query.into_inner();
    match action(&query) {
        "find" => Ok(HttpResponseOk(state.library.find(&body.into_inner().spec))),
        other => Err(unknown_action(other).into()),
    }
}

#[endpoint {
    method = GET,
    path = "/api/content/library/{library_id}",
}]
pub async fn library_get(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<LibraryPath>,
) -> std::result::Result<HttpResponseOk<Library>, HttpError> {
    let state = authorize(&rqctx).await?;
    let library = state.library.library(&path.into_inner().library_id)?;
    Ok(HttpResponseOk(library.clone()))
}

#[endpoint {
    method = PATCH,
    path = "/api/content/library/{library_id}",
}]
pub async fn library_update(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<LibraryPath>,
    body: TypedBody<LibraryUpdate>,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let base = rqctx.context().url();
    state.library.update(
        &path.into_inner().library_id,
        body.into_inner().update_spec,
        &base,
    )?;
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = DELETE,
    path = "/api/content/library/{library_id}",
}]
pub async fn library_delete(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<LibraryPath>,
) -> std::result::Result<HttpResponseDeleted, HttpError> {
    let mut state = authorize(&rqctx).await?;
    state.library.delete(&path.into_inner().library_id)?;
    Ok(HttpResponseDeleted())
}

#[endpoint {
    method = GET,
    path = "/api/content/local-library",
}]
pub async fn local_library_list(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<Vec<String>>, HttpError> {
    let state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.library.libraries_of(LibraryType::Local)))
}

#[endpoint {
    method = POST,
    path = "/api/content/local-library",
}]
pub async fn local_library_create(
    rqctx: RequestContext<Arc<Context>>,
    body: TypedBody<LocalLibraryCreate>,
) -> std::result::Result<HttpResponseOk<String>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let base = rqctx.context().url();
    let id = state.library.create_local(body.into_inner().create_spec, &base)?;
    Ok(HttpResponseOk(id))
}

/// `action=publish` pushes the library to every subscriber.
#[endpoint {
    method = POST,
    path = "/api/content/local-library/{library_id}",
}]
pub async fn local_library_action(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<LibraryPath>,
    query: Query<ActionQuery>,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let id = path.into_inner().library_id;
    let query = query.into_inner();
    match action(&query) {
        "publish" => state.library.publish(&id)?,
        other => return Err(unknown_action(other).into()),
    }
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = GET,
    path = "/api/content/subscribed-library",
}]
pub async fn subscribed_library_list(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<Vec<String>>, HttpError> {
    let state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.library.libraries_of(LibraryType::Subscribed)))
}

#[endpoint {
    method = POST,
    path = "/api/content/subscribed-library",
}]
pub async fn subscribed_library_create(
    rqctx: RequestContext<Arc<Context>>,
    body: TypedBody<SubscribedLibraryCreate>,
) -> std::result::Result<HttpResponseOk<String>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let id = state.library.create_subscribed(body.into_inner().create_spec)?;
    Ok(HttpResponseOk(id))
}

/// `action=sync|evict`.
#[endpoint {
    method = POST,
    path = "/api/content/subscribed-library/{library_id}",
}]
pub async fn subscribed_library_action(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<LibraryPath>,
    query: Query<ActionQuery>,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let id = path.into_inner().library_id;
    let query = query.into_inner();
    match action(&query) {
        "sync" => state.library.sync_library(&id)?,
        "evict" => state.library.evict(&id)?,
        other => return Err(unknown_action(other).into()),
    }
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = GET,
    path = "/api/content/library-item",
}]
pub async fn item_list(
    rqctx: RequestContext<Arc<Context>>,
    query: Query<LibraryItemQuery>,
) -> std::result::Result<HttpResponseOk<Vec<String>>, HttpError> {
    let state = authorize(&rqctx).await?;
    let Some(library) = query.into_inner().library_id else {
        return Err(Error::InvalidArgument("library_id".into()).into());
    };
    Ok(HttpResponseOk(state.library.items(&library)?))
}

/// Creates an item, or finds items with `action=find`.
#[endpoint {
    method = POST,
    path = "/api/content/library-item",
}]
pub async fn item_post(
    rqctx: RequestContext<Arc<Context>>,
    query: Query<LibraryItemQuery>,
    body: UntypedBody,
) -> std::result::Result<HttpResponseOk<Value>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let query = query.into_inner();
    let value = match query.action.as_deref().unwrap_or("") {
        "" => {
            let req: ItemCreate = decode(&body)?;
            Value::from(state.library.create_item(req.create_spec)?)
        }
        "find" => {
            let req: ItemFindBody = decode(&body)?;
            Value::from(state.library.find_items(&req.spec))
        }
        other => return Err(unknown_action(other).into()),
    };
    Ok(HttpResponseOk(value))
}

#[endpoint {
    method = GET,
    path = "/api/content/library-item/{item_id}",
}]
pub async fn item_get(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<ItemPath>,
) -> std::result::Result<HttpResponseOk<Item>, HttpError> {
    let state = authorize(&rqctx).await?;
    let item = state.library.item(&path.into_inner().item_id)?;
    Ok(HttpResponseOk(item.info.clone()))
}

#[endpoint {
    method = PATCH,
    path = "/api/content/library-item/{item_id}",
}]
pub async fn item_update(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<ItemPath>,
    body: TypedBody<ItemUpdate>,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut state = authorize(&rqctx).await?;
    state
        .library
        .update_item(&path.into_inner().item_id, body.into_inner().update_spec)?;
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = DELETE,
    path = "/api/content/library-item/{item_id}",
}]
pub async fn item_delete(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<ItemPath>,
) -> std::result::Result<HttpResponseDeleted, HttpError> {
    let mut state = authorize(&rqctx).await?;
    state.library.delete_item(&path.into_inner().item_id)?;
    Ok(HttpResponseDeleted())
}

/// `action=sync` fetches a subscribed item's content.
#[endpoint {
    method = POST,
    path = "/api/content/library-item/{item_id}",
}]
pub async fn item_action(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<ItemPath>,
    query: Query<ActionQuery>,
    body: UntypedBody,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let id = path.into_inner().item_id;
    let query = query.into_inner();
    match action(&query) {
        "sync" => {
            let req: ItemSyncBody = decode_or_default(&body)?;
            state.library.sync_item(&id, req.force_sync_content)?;
        }
        other => return Err(unknown_action(other).into()),
    }
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = GET,
    path = "/api/content/library-item/{item_id}/file",
}]
pub async fn item_files(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<ItemPath>,
) -> std::result::Result<HttpResponseOk<Vec<ItemFile>>, HttpError> {
    let state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.library.files(&path.into_inner().item_id)?))
}

/// The publication document of a published library.
#[endpoint {
    method = GET,
    path = "/cls/vcsp/lib/{library_id}/lib.json",
    unpublished = true,
}]
pub async fn publication(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<LibraryPath>,
) -> std::result::Result<HttpResponseOk<Value>, HttpError> {
    let ctx = rqctx.context();
    let id = path.into_inner().library_id;
    let credentials = rqctx
        .request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(basic_credentials);
    let state = ctx.vapi.lock().await;
    let library = state.library.library(&id)?;
    let Some(info) = library.publish_info.as_ref().filter(|p| p.published) else {
        return Err(Error::NotFound(format!("library {id}")).into());
    };
    if info.authentication_method == AuthenticationMethod::Basic {
        let expected = info.user_name.clone().zip(info.password.clone());
        if credentials.is_none() || credentials != expected {
            return Err(Error::Unauthenticated.into());
        }
    }
    Ok(HttpResponseOk(json!({
        "vcspVersion": "2",
        "version": library.version,
        "id": format!("urn:uuid:{}", library.id),
        "name": library.name,
        "created": library.creation_time,
        "itemsHref": "items.json",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://127.0.0.1:8989";

    fn local(store: &mut Store, name: &str, publish: Option<PublishInfo>) -> String {
        store
            .create_local(
                LocalLibraryCreateSpec {
                    name: name.into(),
                    publish_info: publish,
                    ..Default::default()
                },
                BASE,
            )
            .unwrap()
    }

    fn published() -> Option<PublishInfo> {
        Some(PublishInfo { published: true, ..Default::default() })
    }

    fn subscribe(
        store: &mut Store,
        name: &str,
        publisher: &str,
        on_demand: bool,
        automatic: bool,
    ) -> VapiResult<String> {
        store.create_subscribed(SubscribedLibraryCreateSpec {
            name: name.into(),
            subscription_info: SubscriptionInfo {
                subscription_url: publish_url(BASE, publisher),
                on_demand,
                automatic_sync_enabled: automatic,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn item(store: &mut Store, library: &str, name: &str) -> String {
        store
            .create_item(ItemCreateSpec {
                library_id: library.into(),
                name: name.into(),
                kind: "iso".into(),
                ..Default::default()
            })
            .unwrap()
    }

    fn upload(store: &mut Store, item: &str, data: &'static [u8]) {
        store
            .apply_files(item, vec![("file.iso".to_string(), Bytes::from_static(data))])
            .unwrap();
    }

    #[test]
    fn publish_urls() {
        let url = publish_url(BASE, "abc");
        assert_eq!(url, "http://127.0.0.1:8989/cls/vcsp/lib/abc/lib.json");
        assert_eq!(published_id(&url), Some("abc"));
        assert_eq!(published_id("http://host/cls/vcsp/lib/abc/items.json"), None);
        assert_eq!(published_id("http://host/other"), None);
    }

    #[test]
    fn local_libraries() {
        let mut store = Store::default();
        let id = local(&mut store, "isos", published());
        let info = store.library(&id).unwrap().publish_info.clone().unwrap();
        assert_eq!(info.publish_url, Some(publish_url(BASE, &id)));
        assert!(matches!(
            store.create_local(
                LocalLibraryCreateSpec { name: "isos".into(), ..Default::default() },
                BASE
            ),
            Err(Error::AlreadyExists(_))
        ));

        assert_eq!(
            store.find(&LibraryFind { name: Some("isos".into()), kind: None }),
            vec![id.clone()]
        );
        assert!(store
            .find(&LibraryFind { name: None, kind: Some(LibraryType::Subscribed) })
            .is_empty());

        let i = item(&mut store, &id, "ubuntu");
        upload(&mut store, &i, b"0123456789");
        let info = &store.item(&i).unwrap().info;
        assert_eq!(info.size, 10);
        assert_eq!(info.content_version, "2");
        assert!(info.cached);
        assert_eq!(store.files(&i).unwrap()[0].version, "1");

        store.delete(&id).unwrap();
        assert!(matches!(store.item(&i), Err(Error::NotFound(_))));
    }

    #[test]
    fn subscription_requires_a_published_library() {
        let mut store = Store::default();
        let private = local(&mut store, "private", None);
        assert!(matches!(
            subscribe(&mut store, "sub", &private, false, false),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            subscribe(&mut store, "sub", "missing", false, false),
            Err(Error::InvalidArgument(_))
        ));

        let secured = local(
            &mut store,
            "secured",
            Some(PublishInfo {
                published: true,
                authentication_method: AuthenticationMethod::Basic,
                user_name: Some("vcsp".into()),
                password: Some("secret".into()),
                publish_url: None,
            }),
        );
        assert!(matches!(
            subscribe(&mut store, "sub", &secured, false, false),
            Err(Error::Inaccessible(_))
        ));
        let ok = store.create_subscribed(SubscribedLibraryCreateSpec {
            name: "sub".into(),
            subscription_info: SubscriptionInfo {
                subscription_url: publish_url(BASE, &secured),
                authentication_method: AuthenticationMethod::Basic,
                user_name: Some("vcsp".into()),
                password: Some("secret".into()),
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(ok.is_ok());
    }

    #[test]
    fn sync_mirrors_the_publisher() {
        let mut store = Store::default();
        let publisher = local(&mut store, "pub", published());
        let a = item(&mut store, &publisher, "a");
        upload(&mut store, &a, b"aaaa");

        let sub = subscribe(&mut store, "sub", &publisher, false, false).unwrap();
        let mirrored = store.items(&sub).unwrap();
        assert_eq!(mirrored.len(), 1);
        let copy = store.item(&mirrored[0]).unwrap();
        assert_eq!(copy.info.source_id.as_deref(), Some(a.as_str()));
        assert!(copy.info.cached);
        assert_eq!(store.data(&mirrored[0], "file.iso").unwrap(), Bytes::from_static(b"aaaa"));
        assert!(store.library(&sub).unwrap().last_sync_time.is_some());

        // Changes reach a manually synchronized subscriber on sync only.
        let b = item(&mut store, &publisher, "b");
        upload(&mut store, &a, b"aaaaaaaa");
        assert_eq!(store.items(&sub).unwrap().len(), 1);
        store.sync_library(&sub).unwrap();
        assert_eq!(store.items(&sub).unwrap().len(), 2);
        assert_eq!(store.item(&mirrored[0]).unwrap().info.size, 8);

        store.delete_item(&b).unwrap();
        store.publish(&publisher).unwrap();
        assert_eq!(store.items(&sub).unwrap(), mirrored);

        assert!(matches!(
            store.create_item(ItemCreateSpec {
                library_id: sub.clone(),
                name: "c".into(),
                ..Default::default()
            }),
            Err(Error::NotAllowed(_))
        ));
    }

    #[test]
    fn on_demand_and_automatic_sync() {
        let mut store = Store::default();
        let publisher = local(&mut store, "pub", published());
        let a = item(&mut store, &publisher, "a");
        upload(&mut store, &a, b"aaaa");

        let sub = subscribe(&mut store, "sub", &publisher, true, true).unwrap();
        let copy = store.items(&sub).unwrap()[0].clone();
        assert!(!store.item(&copy).unwrap().info.cached);
        assert!(matches!(store.data(&copy, "file.iso"), Err(Error::NotFound(_))));

        store.sync_item(&copy, false).unwrap();
        assert!(store.item(&copy).unwrap().info.cached);
        assert_eq!(store.data(&copy, "file.iso").unwrap().len(), 4);

        store.evict(&sub).unwrap();
        assert!(!store.item(&copy).unwrap().info.cached);
        store.ensure_cached(&copy).unwrap();
        assert!(store.item(&copy).unwrap().info.cached);

        item(&mut store, &publisher, "b");
        assert_eq!(store.items(&sub).unwrap().len(), 2);

        let eager = subscribe(&mut store, "eager", &publisher, false, false).unwrap();
        assert!(matches!(store.evict(&eager), Err(Error::NotAllowed(_))));
        assert!(matches!(store.publish(&sub), Err(Error::NotFound(_)) | Err(Error::NotAllowed(_))));
    }

    struct Capture(Arc<std::sync::Mutex<Vec<String>>>);

    impl slog::Drain for Capture {
        type Ok = ();
        type Err = slog::Never;

        fn log(
            &self,
            record: &slog::Record<'_>,
            _: &slog::OwnedKVList,
        ) -> Result<(), slog::Never> {
            self.0.lock().unwrap().push(record.msg().to_string());
            Ok(())
        }
    }

    #[test]
    fn failed_automatic_sync_is_logged() {
        let messages = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut store = Store::new(Logger::root(Capture(messages.clone()), o!()));
        let publisher = local(&mut store, "isos", published());
        let sub = subscribe(&mut store, "mirror", &publisher, false, true).unwrap();
        item(&mut store, &publisher, "first");
        assert_eq!(store.items(&sub).unwrap().len(), 1);

        // once unpublished the subscription URL no longer resolves
        store
            .update(
                &publisher,
                LibraryUpdateSpec {
                    publish_info: Some(PublishInfo { published: false, ..Default::default() }),
                    ..Default::default()
                },
                BASE,
            )
            .unwrap();
        assert!(messages.lock().unwrap().is_empty());
        item(&mut store, &publisher, "second");

        assert_eq!(store.items(&publisher).unwrap().len(), 2);
        assert_eq!(store.items(&sub).unwrap().len(), 1);
        assert_eq!(*messages.lock().unwrap(), vec!["subscriber left out of sync".to_string()]);
    }
}
