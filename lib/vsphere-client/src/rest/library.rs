// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Content libraries, their items, and the update and download sessions
//! that move item files.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use slog::debug;
use vim_api_types::vapi::library::{
    DownloadFile, DownloadSession, DownloadSessionCreate, FileNameBody,
    FileSpec, FileSpecBody, Item, ItemCreate, ItemCreateSpec, ItemFile,
    ItemFind, ItemFindBody, ItemSyncBody, ItemUpdate, ItemUpdateSpec, Library,
    LibraryFind, LibraryFindBody, LibraryUpdate, LibraryUpdateSpec,
    LocalLibraryCreate, LocalLibraryCreateSpec, PrepareStatus, SourceType,
    SubscribedLibraryCreate, SubscribedLibraryCreateSpec, UpdateFile,
    UpdateSession, UpdateSessionCreate, UpdateSessionCreateSpec,
};

use super::{not_found, Client};
use crate::{check, segment, Error, Result};

const LIBRARY: &str = "/api/content/library";
const LOCAL: &str = "/api/content/local-library";
const SUBSCRIBED: &str = "/api/content/subscribed-library";
const ITEM: &str = "/api/content/library-item";
const UPDATE: &str = "/api/content/update-session";
const DOWNLOAD: &str = "/api/content/download-session";

/// How long [`Manager::download_file`] waits for a file to be prepared.
const PREPARE_TIMEOUT: Duration = Duration::from_secs(60);
const PREPARE_POLL: Duration = Duration::from_millis(100);

#[derive(Serialize)]
struct FailBody<'a> {
    client_error_message: &'a str,
}

#[derive(Clone)]
pub struct Manager {
    client: Client,
}

impl Manager {
    pub fn new(client: &Client) -> Self {
        Manager { client: client.clone() }
    }

    /// Ids of every library.
    pub async fn list_libraries(&self) -> Result<Vec<String>> {
        self.client.get(LIBRARY, &[]).await
    }

    pub async fn libraries(&self) -> Result<Vec<Library>> {
        let mut all = Vec::new();
        for id in self.list_libraries().await? {
            all.push(self.library_by_id(&id).await?);
        }
        Ok(all)
    }

    pub async fn find_libraries(&self, spec: LibraryFind) -> Result<Vec<String>> {
        self.client.post(LIBRARY, Some("find"), &LibraryFindBody { spec }).await
    }

    /// A library by id or name.
    pub async fn library(&self, id: &str) -> Result<Library> {
        match self.library_by_id(id).await {
            Err(Error::NotFound { .. }) => {}
            found => return found,
        }
        let spec = LibraryFind { name: Some(id.to_string()), kind: None };
        let found = self.find_libraries(spec).await?;
        match found.as_slice() {
            [one] => self.library_by_id(one).await,
            [] => Err(Error::NotFound { kind: "library", path: id.to_string() }),
            _ => Err(Error::Multiple { kind: "library", path: id.to_string() }),
        }
    }

    async fn library_by_id(&self, id: &str) -> Result<Library> {
        self.client
            .get(&format!("{LIBRARY}/{}", segment(id)), &[])
            .await
            .map_err(not_found("library", id))
    }

    pub async fn update_library(&self, id: &str, spec: LibraryUpdateSpec) -> Result<()> {
        self.client
            .patch(&format!("{LIBRARY}/{}", segment(id)), &LibraryUpdate { update_spec: spec })
            .await
    }

    /// Deletes a library and its items.
    pub async fn delete_library(&self, id: &str) -> Result<()> {
        self.client.delete(&format!("{LIBRARY}/{}", segment(id))).await
    }

    pub async fn create_local_library(&self, spec: LocalLibraryCreateSpec) -> Result<String> {
        self.client.post(LOCAL, None, &LocalLibraryCreate { create_spec: spec }).await
    }

    pub async fn list_local_libraries(&self) -> Result<Vec<String>> {
        self.client.get(LOCAL, &[]).await
    }

    /// Pushes a published library to its subscribers.
    pub async fn publish_library(&self, id: &str) -> Result<()> {
        self.client
            .post(&format!("{LOCAL}/{}", segment(id)), Some("publish"), &serde_json::json!({}))
            .await
    }

    /// Subscribes to the library published at `spec.subscription_info`.
    pub async fn create_subscribed_library(
        &self,
        spec: SubscribedLibraryCreateSpec,
    ) -> Result<String> {
        self.client
            .post(SUBSCRIBED, None, &SubscribedLibraryCreate { create_spec: spec })
            .await
    }

    pub async fn list_subscribed_libraries(&self) -> Result<Vec<String>> {
        self.client.get(SUBSCRIBED, &[]).await
    }

    pub async fn sync_library(&self, id: &str) -> Result<()> {
        self.client
            .post(&format!("{SUBSCRIBED}/{}", segment(id)), Some("sync"), &serde_json::json!({}))
            .await
    }

    /// Drops the cached content of an on-demand subscribed library.
    pub async fn evict_library(&self, id: &str) -> Result<()> {
        self.client
            .post(&format!("{SUBSCRIBED}/{}", segment(id)), Some("evict"), &serde_json::json!({}))
            .await
    }

    pub async fn create_item(&self, spec: ItemCreateSpec) -> Result<String> {
        self.client.post(ITEM, None, &ItemCreate { create_spec: spec }).await
    }

    /// Ids of the items in `library_id`.
    pub async fn list_items(&self, library_id: &str) -> Result<Vec<String>> {
        self.client.get(ITEM, &[("library_id", library_id)]).await
    }

    pub async fn items(&self, library_id: &str) -> Result<Vec<Item>> {
        let mut all = Vec::new();
        for id in self.list_items(library_id).await? {
            all.push(self.item(&id).await?);
        }
        Ok(all)
    }

    pub async fn find_items(&self, spec: ItemFind) -> Result<Vec<String>> {
        self.client.post(ITEM, Some("find"), &ItemFindBody { spec }).await
    }

    pub async fn item(&self, id: &str) -> Result<Item> {
        self.client
            .get(&format!("{ITEM}/{}", segment(id)), &[])
            .await
            .map_err(not_found("library item", id))
    }

    pub async fn update_item(&self, id: &str, spec: ItemUpdateSpec) -> Result<()> {
        self.client
            .patch(&format!("{ITEM}/{}", segment(id)), &ItemUpdate { update_spec: spec })
            .await
    }

    pub async fn delete_item(&self, id: &str) -> Result<()> {
        self.client.delete(&format!("{ITEM}/{}", segment(id))).await
    }

    /// Fetches the content of an item of a subscribed library.
    pub async fn sync_item(&self, id: &str, force_sync_content: bool) -> Result<()> {
        self.client
            .post(
                &format!("{ITEM}/{}", segment(id)),
                Some("sync"),
                &ItemSyncBody { force_sync_content },
            )
            .await
    }

    pub async fn item_files(&self, id: &str) -> Result<Vec<ItemFile>> {
        self.client.get(&format!("{ITEM}/{}/file", segment(id)), &[]).await
    }

    /// Opens a session for replacing the files of `library_item_id`.
    pub async fn create_update_session(&self, library_item_id: &str) -> Result<String> {
        let create_spec = UpdateSessionCreateSpec { library_item_id: library_item_id.to_string() };
        self.client.post(UPDATE, None, &UpdateSessionCreate { create_spec }).await
    }

    pub async fn list_update_sessions(&self) -> Result<Vec<String>> {
        self.client.get(UPDATE, &[]).await
    }

    pub async fn update_session(&self, id: &str) -> Result<UpdateSession> {
        self.client
            .get(&format!("{UPDATE}/{}", segment(id)), &[])
            .await
            .map_err(not_found("update session", id))
    }

    async fn update_action<A: Serialize>(&self, id: &str, action: &str, body: &A) -> Result<()> {
        self.client.post(&format!("{UPDATE}/{}", segment(id)), Some(action), body).await
    }

    /// Commits the session's files to the item.
    pub async fn complete_update_session(&self, id: &str) -> Result<()> {
        self.update_action(id, "complete", &serde_json::json!({})).await
    }

    pub async fn cancel_update_session(&self, id: &str) -> Result<()> {
        self.update_action(id, "cancel", &serde_json::json!({})).await
    }

    pub async fn fail_update_session(&self, id: &str, message: &str) -> Result<()> {
        self.update_action(id, "fail", &FailBody { client_error_message: message }).await
    }

    pub async fn keep_alive_update_session(&self, id: &str) -> Result<()> {
        self.update_action(id, "keep-alive", &serde_json::json!({})).await
    }

    pub async fn delete_update_session(&self, id: &str) -> Result<()> {
        self.client.delete(&format!("{UPDATE}/{}", segment(id))).await
    }

    /// Adds a file to an update session. Pushed files get an upload
    /// endpoint; pulled files are fetched by the server from
    /// `spec.source_endpoint`.
    pub async fn add_file(&self, session: &str, spec: FileSpec) -> Result<UpdateFile> {
        self.client
            .post(
                &format!("{UPDATE}/{}/file", segment(session)),
                Some("add"),
                &FileSpecBody { file_spec: spec },
            )
            .await
    }

    pub async fn remove_file(&self, session: &str, name: &str) -> Result<()> {
        self.client
            .post(
                &format!("{UPDATE}/{}/file", segment(session)),
                Some("remove"),
                &FileNameBody { file_name: name.to_string() },
            )
            .await
    }

    pub async fn update_files(&self, session: &str) -> Result<Vec<UpdateFile>> {
        self.client.get(&format!("{UPDATE}/{}/file", segment(session)), &[]).await
    }

    pub async fn update_file(&self, session: &str, name: &str) -> Result<UpdateFile> {
        self.client
            .get(&format!("{UPDATE}/{}/file/{}", segment(session), segment(name)), &[])
            .await
    }

    /// Sends `data` to the upload endpoint of a pushed file.
    pub async fn upload(&self, file: &UpdateFile, data: Bytes) -> Result<()> {
        let endpoint = file
            .upload_endpoint
            .as_ref()
            .ok_or_else(|| Error::NotFound { kind: "upload endpoint", path: file.name.clone() })?;
        debug!(self.client.log(), "upload"; "uri" => &endpoint.uri, "bytes" => data.len());
        let response = self.client.http().put(&endpoint.uri).body(data).send().await?;
        check(response).await?;
        Ok(())
    }

    /// Replaces file `name` of `item_id` with `data` in a single update
    /// session.
    pub async fn upload_item_file(&self, item_id: &str, name: &str, data: Bytes) -> Result<()> {
        let session = self.create_update_session(item_id).await?;
        let spec = FileSpec {
            name: name.to_string(),
            source_type: SourceType::Push,
            source_endpoint: None,
            size: i64::try_from(data.len()).ok(),
        };
        let result = async {
            let file = self.add_file(&session, spec).await?;
            self.upload(&file, data).await?;
            self.complete_update_session(&session).await
        }
        .await;
        if let Err(e) = &result {
            let _ = self.fail_update_session(&session, &e.to_string()).await;
        }
        result
    }

    /// Opens a session for reading the files of `library_item_id`.
    pub async fn create_download_session(&self, library_item_id: &str) -> Result<String> {
        let create_spec = UpdateSessionCreateSpec { library_item_id: library_item_id.to_string() };
        self.client.post(DOWNLOAD, None, &DownloadSessionCreate { create_spec }).await
    }

    pub async fn list_download_sessions(&self) -> Result<Vec<String>> {
        self.client.get(DOWNLOAD, &[]).await
    }

    pub async fn download_session(&self, id: &str) -> Result<DownloadSession> {
        self.client
            .get(&format!("{DOWNLOAD}/{}", segment(id)), &[])
            .await
            .map_err(not_found("download session", id))
    }

    pub async fn keep_alive_download_session(&self, id: &str) -> Result<()> {
        self.client
            .post(&format!("{DOWNLOAD}/{}", segment(id)), Some("keep-alive"), &serde_json::json!({}))
            .await
    }

    pub async fn cancel_download_session(&self, id: &str) -> Result<()> {
        self.client
            .post(&format!("{DOWNLOAD}/{}", segment(id)), Some("cancel"), &serde_json::json!({}))
            .await
    }

    pub async fn delete_download_session(&self, id: &str) -> Result<()> {
        self.client.delete(&format!("{DOWNLOAD}/{}", segment(id))).await
    }

    pub async fn download_files(&self, session: &str) -> Result<Vec<DownloadFile>> {
        self.client.get(&format!("{DOWNLOAD}/{}/file", segment(session)), &[]).await
    }

    pub async fn download_file_info(&self, session: &str, name: &str) -> Result<DownloadFile> {
        self.client
            .get(&format!("{DOWNLOAD}/{}/file/{}", segment(session), segment(name)), &[])
            .await
    }

    /// Asks the server to make file `name` available for download.
    pub async fn prepare_file(&self, session: &str, name: &str) -> Result<DownloadFile> {
        self.client
            .post(
                &format!("{DOWNLOAD}/{}/file", segment(session)),
                Some("prepare"),
                &FileNameBody { file_name: name.to_string() },
            )
            .await
    }

    /// Prepares file `name`, waits until it is ready and fetches it.
    pub async fn download_file(&self, session: &str, name: &str) -> Result<Bytes> {
        let mut file = self.prepare_file(session, name).await?;
        let waited = tokio::time::timeout(PREPARE_TIMEOUT, async {
            loop {
                match file.status {
                    PrepareStatus::Prepared => return Ok(file),
                    PrepareStatus::Error => {
                        return Err(Error::NotFound { kind: "prepared file", path: name.to_string() })
                    }
                    _ => {}
                }
                tokio::time::sleep(PREPARE_POLL).await;
                file = self.download_file_info(session, name).await?;
            }
        })
        .await
        .map_err(|_| Error::Timeout("file preparation"))??;
        let endpoint = waited
            .download_endpoint
            .ok_or_else(|| Error::NotFound { kind: "download endpoint", path: name.to_string() })?;
        let response = self.client.http().get(&endpoint.uri).send().await?;
        Ok(check(response).await?.bytes().await?)
    }

    /// Reads file `name` of `item_id` in a single download session.
    pub async fn download_item_file(&self, item_id: &str, name: &str) -> Result<Bytes> {
        let session = self.create_download_session(item_id).await?;
        let result = self.download_file(&session, name).await;
        if let Err(e) = self.delete_download_session(&session).await {
            debug!(self.client.log(), "download session cleanup failed"; "error" => %e);
        }
        result
    }
}
