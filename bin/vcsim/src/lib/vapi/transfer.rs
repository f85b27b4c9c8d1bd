// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Update and download sessions moving content in and out of library items.
//!
//! Files of an update session are either pushed by the client to the
//! session's `/cls/data` endpoint or pulled by the simulator from a source
//! URL. Nothing reaches the item until the session completes. Download
//! sessions expose an item's files under `/cls/download` once prepared.
//! Sessions past their expiration time are dropped on the next access.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dropshot::{
    endpoint, Body, HttpError, HttpResponseDeleted, HttpResponseOk,
    HttpResponseUpdatedNoContent, Path, Query, RequestContext, TypedBody,
    UntypedBody,
};
use schemars::JsonSchema;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::Value;
use slog::{info, o, warn};
use vim_api_types::vapi::library::{
    DownloadFile, DownloadSession, DownloadSessionCreate, FileNameBody,
    FileSpec, FileSpecBody, PrepareStatus, SessionState, SourceType,
    TransferEndpoint, TransferStatus, UpdateFile, UpdateSession,
    UpdateSessionCreate,
};
use vim_api_types::vapi::ActionQuery;

use super::{
    action, authorize, decode, decode_or_default, library, unknown_action,
    Error, VapiResult,
};
use crate::Context;

const SEGMENT: &AsciiSet =
    &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Escapes a file name for use as one URL path segment.
fn segment(name: &str) -> String {
    utf8_percent_encode(name, SEGMENT).to_string()
}

struct Upload {
    info: UpdateFile,
    data: Option<Bytes>,
}

struct Update {
    info: UpdateSession,
    files: BTreeMap<String, Upload>,
}

struct Download {
    info: DownloadSession,
    files: BTreeMap<String, DownloadFile>,
}

#[derive(Default)]
pub struct Store {
    updates: BTreeMap<String, Update>,
    downloads: BTreeMap<String, Download>,
}

/// Body of the `fail` action.
#[derive(Debug, Default, Deserialize)]
pub struct FailSpec {
    #[serde(default)]
    pub client_error_message: String,
}

fn expires(lifetime: Duration) -> DateTime<Utc> {
    let lifetime = chrono::Duration::from_std(lifetime)
        .unwrap_or_else(|_| chrono::Duration::hours(1));
    Utc::now() + lifetime
}

fn not_found(id: &str) -> Error {
    Error::NotFound(format!("session {id}"))
}

fn inactive(id: &str) -> Error {
    Error::NotAllowed(format!("session {id} is not active"))
}

impl Store {
    /// Drops every session whose expiration time has passed.
    pub fn purge(&mut self) {
        let now = Utc::now();
        self.updates.retain(|_, s| s.info.expiration_time > now);
        self.downloads.retain(|_, s| s.info.expiration_time > now);
    }

    pub fn create_update(
        &mut self,
        library: &library::Store,
        item: &str,
        lifetime: Duration,
    ) -> VapiResult<String> {
        self.purge();
        let stored = library.item(item)?;
        library.writable(&stored.info.library_id)?;
        let id = uuid::Uuid::new_v4().to_string();
        let info = UpdateSession {
            id: id.clone(),
            library_item_id: item.to_string(),
            library_item_content_version: stored.info.content_version.clone(),
            state: SessionState::Active,
            client_progress: 0,
            expiration_time: expires(lifetime),
            error_message: None,
        };
        self.updates.insert(id.clone(), Update { info, files: BTreeMap::new() });
        Ok(id)
    }

    pub fn updates(&mut self) -> Vec<String> {
        self.purge();
        self.updates.keys().cloned().collect()
    }

    fn update_mut(&mut self, id: &str) -> VapiResult<&mut Update> {
        self.purge();
        self.updates.get_mut(id).ok_or_else(|| not_found(id))
    }

    fn active_update(&mut self, id: &str) -> VapiResult<&mut Update> {
        let update = self.update_mut(id)?;
        match update.info.state {
            SessionState::Active => Ok(update),
            _ => Err(inactive(id)),
        }
    }

    pub fn update(&mut self, id: &str) -> VapiResult<UpdateSession> {
        Ok(self.update_mut(id)?.info.clone())
    }

    pub fn delete_update(&mut self, id: &str) -> VapiResult<()> {
        self.purge();
        self.updates.remove(id).map(|_| ()).ok_or_else(|| not_found(id))
    }

    /// Applies the session's files to its item. Every file must be ready.
    pub fn complete(&mut self, library: &mut library::Store, id: &str) -> VapiResult<()> {
        let update = self.active_update(id)?;
        if let Some(pending) =
            update.files.values().find(|f| f.info.status != TransferStatus::Ready)
        {
            return Err(Error::NotAllowed(format!(
                "file {} is {:?}",
                pending.info.name, pending.info.status
            )));
        }
        let files = update
            .files
            .iter()
            .filter_map(|(name, f)| f.data.clone().map(|d| (name.clone(), d)))
            .collect();
        library.apply_files(&update.info.library_item_id, files)?;
        update.info.state = SessionState::Done;
        update.info.client_progress = 100;
        Ok(())
    }

    pub fn cancel(&mut self, id: &str) -> VapiResult<()> {
        self.active_update(id)?.info.state = SessionState::Canceled;
        Ok(())
    }

    pub fn fail(&mut self, id: &str, message: String) -> VapiResult<()> {
        let update = self.active_update(id)?;
        update.info.state = SessionState::Error;
        update.info.error_message = Some(message);
        Ok(())
    }

    pub fn keep_alive(&mut self, id: &str, lifetime: Duration) -> VapiResult<()> {
        self.active_update(id)?.info.expiration_time = expires(lifetime);
        Ok(())
    }

    /// Adds a file to update session `id`. Pushed files get an upload
    /// endpoint below `base`; pulled files start out transferring.
    pub fn add_file(&mut self, id: &str, spec: FileSpec, base: &str) -> VapiResult<UpdateFile> {
        let update = self.active_update(id)?;
        let (status, upload_endpoint) = match spec.source_type {
            SourceType::Push => (
                TransferStatus::WaitingForTransfer,
                Some(TransferEndpoint {
                    uri: format!("{base}/cls/data/{id}/{}", segment(&spec.name)),
                    ssl_certificate_thumbprint: None,
                }),
            ),
            SourceType::Pull if spec.source_endpoint.is_none() => {
                return Err(Error::InvalidArgument("file_spec.source_endpoint".into()));
            }
            SourceType::Pull => (TransferStatus::Transferring, None),
        };
        let info = UpdateFile {
            name: spec.name.clone(),
            source_type: spec.source_type,
            status,
            bytes_transferred: 0,
            size: spec.size,
            upload_endpoint,
            source_endpoint: spec.source_endpoint,
            error_message: None,
        };
        update
            .files
            .insert(spec.name, Upload { info: info.clone(), data: None });
        Ok(info)
    }

    pub fn remove_file(&mut self, id: &str, name: &str) -> VapiResult<()> {
        self.active_update(id)?
            .files
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("file {name}")))
    }

    pub fn files(&mut self, id: &str) -> VapiResult<Vec<UpdateFile>> {
        Ok(self.update_mut(id)?.files.values().map(|f| f.info.clone()).collect())
    }

    pub fn file(&mut self, id: &str, name: &str) -> VapiResult<UpdateFile> {
        self.update_mut(id)?
            .files
            .get(name)
            .map(|f| f.info.clone())
            .ok_or_else(|| Error::NotFound(format!("file {name}")))
    }

    fn upload_mut(&mut self, id: &str, name: &str) -> VapiResult<&mut Upload> {
        self.active_update(id)?
            .files
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("file {name}")))
    }

    /// Stores content pushed by the client.
    pub fn receive(&mut self, id: &str, name: &str, data: Bytes) -> VapiResult<()> {
        let upload = self.upload_mut(id, name)?;
        if upload.info.source_type != SourceType::Push {
            return Err(Error::NotAllowed(format!("file {name} is pulled")));
        }
        let len = data.len() as i64;
        if upload.info.size.is_some_and(|size| size != len) {
            upload.info.status = TransferStatus::Error;
            upload.info.error_message =
                Some(format!("expected {:?} bytes, received {len}", upload.info.size));
            return Err(Error::InvalidArgument(format!("size of {name}")));
        }
        upload.info.status = TransferStatus::Ready;
        upload.info.bytes_transferred = len;
        upload.info.size = Some(len);
        upload.data = Some(data);
        Ok(())
    }

    /// Records the outcome of pulling a file from its source.
    pub fn pulled(
        &mut self,
        id: &str,
        name: &str,
        outcome: std::result::Result<Bytes, String>,
    ) -> VapiResult<()> {
        let upload = self.upload_mut(id, name)?;
        match outcome {
            Ok(data) => {
                let len = data.len() as i64;
                upload.info.status = TransferStatus::Ready;
                upload.info.bytes_transferred = len;
                upload.info.size = Some(len);
                upload.data = Some(data);
            }
            Err(message) => {
                upload.info.status = TransferStatus::Error;
                upload.info.error_message = Some(message);
            }
        }
        Ok(())
    }

    /// Opens a download session on `item`, first fetching the content of
    /// an uncached subscribed item.
    pub fn create_download(
        &mut self,
        library: &mut library::Store,
        item: &str,
        lifetime: Duration,
    ) -> VapiResult<String> {
        self.purge();
        library.ensure_cached(item)?;
        let files = library
            .files(item)?
            .into_iter()
            .map(|f| {
                let file = DownloadFile {
                    name: f.name.clone(),
                    size: f.size,
                    status: PrepareStatus::Unprepared,
                    bytes_transferred: 0,
                    download_endpoint: None,
                };
                (f.name, file)
            })
            .collect();
        let id = uuid::Uuid::new_v4().to_string();
        let info = DownloadSession {
            id: id.clone(),
            library_item_id: item.to_string(),
            library_item_content_version: library.item(item)?.info.content_version.clone(),
            state: SessionState::Active,
            client_progress: 0,
            expiration_time: expires(lifetime),
            error_message: None,
        };
        self.downloads.insert(id.clone(), Download { info, files });
        Ok(id)
    }

    pub fn downloads(&mut self) -> Vec<String> {
        self.purge();
        self.downloads.keys().cloned().collect()
    }

    fn download_mut(&mut self, id: &str) -> VapiResult<&mut Download> {
        self.purge();
        self.downloads.get_mut(id).ok_or_else(|| not_found(id))
    }

    fn active_download(&mut self, id: &str) -> VapiResult<&mut Download> {
        let download = self.download_mut(id)?;
        match download.info.state {
            SessionState::Active => Ok(download),
            _ => Err(inactive(id)),
        }
    }

    pub fn download(&mut self, id: &str) -> VapiResult<DownloadSession> {
        Ok(self.download_mut(id)?.info.clone())
    }

    pub fn delete_download(&mut self, id: &str) -> VapiResult<()> {
        self.purge();
        self.downloads.remove(id).map(|_| ()).ok_or_else(|| not_found(id))
    }

    pub fn download_action(&mut self, id: &str, action: &str, lifetime: Duration) -> VapiResult<()> {
        let download = self.active_download(id)?;
        match action {
            "keep-alive" => download.info.expiration_time = expires(lifetime),
            "cancel" => download.info.state = SessionState::Canceled,
            "fail" => download.info.state = SessionState::Error,
            other => return Err(unknown_action(other)),
        }
        Ok(())
    }

    pub fn download_files(&mut self, id: &str) -> VapiResult<Vec<DownloadFile>> {
        Ok(self.download_mut(id)?.files.values().cloned().collect())
    }

    pub fn download_file(&mut self, id: &str, name: &str) -> VapiResult<DownloadFile> {
        self.download_mut(id)?
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("file {name}")))
    }

    /// Makes file `name` of download session `id` available below `base`.
    pub fn prepare(&mut self, id: &str, name: &str, base: &str) -> VapiResult<DownloadFile> {
        let file = self
            .active_download(id)?
            .files
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("file {name}")))?;
        file.status = PrepareStatus::Prepared;
        file.download_endpoint = Some(TransferEndpoint {
            uri: format!("{base}/cls/download/{id}/{}", segment(name)),
            ssl_certificate_thumbprint: None,
        });
        Ok(file.clone())
    }

    /// Content of a prepared file of download session `id`.
    pub fn serve(&mut self, library: &library::Store, id: &str, name: &str) -> VapiResult<Bytes> {
        let download = self.active_download(id)?;
        let file = download
            .files
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("file {name}")))?;
        if file.status != PrepareStatus::Prepared {
            return Err(Error::NotAllowed(format!("file {name} is not prepared")));
        }
        let data = library.data(&download.info.library_item_id, name)?;
        file.bytes_transferred = data.len() as i64;
        Ok(data)
    }
}

async fn fetch(client: &reqwest::Client, uri: &str) -> std::result::Result<Bytes, String> {
    let response = client.get(uri).send().await.map_err(|e| e.to_string())?;
    let response = response.error_for_status().map_err(|e| e.to_string())?;
    response.bytes().await.map_err(|e| e.to_string())
}

#[derive(Deserialize, JsonSchema)]
pub struct SessionPath {
    session_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct FilePath {
    session_id: String,
    file_name: String,
}

#[endpoint {
    method = GET,
    path = "/api/content/update-session",
}]
pub async fn update_list(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<Vec<String>>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.transfer.updates()))
}

#[endpoint {
    method = POST,
    path = "/api/content/update-session",
}]
pub async fn update_create(
    rqctx: RequestContext<Arc<Context>>,
    body: TypedBody<UpdateSessionCreate>,
) -> std::result::Result<HttpResponseOk<String>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let lifetime = rqctx.context().config.session.transfer_expiration();
    let item = body.into_inner().create_spec.library_item_id;
    let state = &mut *state;
    let id = state.transfer.create_update(&state.library, &item, lifetime)?;
    info!(rqctx.log, "update session created"; "session" => &id, "item" => &item);
    Ok(HttpResponseOk(id))
}

#[endpoint {
    method = GET,
    path = "/api/content/update-session/{session_id}",
}]
pub async fn update_get(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<SessionPath>,
) -> std::result::Result<HttpResponseOk<UpdateSession>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.transfer.update(&path.into_inner().session_id)?))
}

/// `action=complete|cancel|fail|keep-alive`.
#[endpoint {
    method = POST,
    path = "/api/content/update-session/{session_id}",
}]
pub async fn update_action(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<SessionPath>,
    query: Query<ActionQuery>,
    body: UntypedBody,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let state = &mut *state;
    let id = path.into_inner().session_id;
    let query = query.into_inner();
    match action(&query) {
        "complete" => {
            state.transfer.complete(&mut state.library, &id)?;
            info!(rqctx.log, "update session complete"; "session" => &id);
        }
        "cancel" => state.transfer.cancel(&id)?,
        "fail" => {
            let spec: FailSpec = decode_or_default(&body)?;
            state.transfer.fail(&id, spec.client_error_message)?;
        }
        "keep-alive" => {
            let lifetime = rqctx.context().config.session.transfer_expiration();
            state.transfer.keep_alive(&id, lifetime)?;
        }
        other => return Err(unknown_action(other).into()),
    }
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = DELETE,
    path = "/api/content/update-session/{session_id}",
}]
pub async fn update_delete(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<SessionPath>,
) -> std::result::Result<HttpResponseDeleted, HttpError> {
    let mut state = authorize(&rqctx).await?;
    state.transfer.delete_update(&path.into_inner().session_id)?;
    Ok(HttpResponseDeleted())
}

#[endpoint {
    method = GET,
    path = "/api/content/update-session/{session_id}/file",
}]
pub async fn update_files(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<SessionPath>,
) -> std::result::Result<HttpResponseOk<Vec<UpdateFile>>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.transfer.files(&path.into_inner().session_id)?))
}

/// `action=add` with a file spec, or `action=remove` with a file name.
/// Pulled files are fetched in the background.
#[endpoint {
    method = POST,
    path = "/api/content/update-session/{session_id}/file",
}]
pub async fn update_file_action(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<SessionPath>,
    query: Query<ActionQuery>,
    body: UntypedBody,
) -> std::result::Result<HttpResponseOk<Value>, HttpError> {
    let ctx = rqctx.context();
    let mut state = authorize(&rqctx).await?;
    let id = path.into_inner().session_id;
    let query = query.into_inner();
    match action(&query) {
        "add" => {
            let req: FileSpecBody = decode(&body)?;
            let file = state.transfer.add_file(&id, req.file_spec, &ctx.url())?;
            if let Some(source) = &file.source_endpoint {
                let ctx = Arc::clone(ctx);
                let log = rqctx.log.new(o!("session" => id.clone(), "file" => file.name.clone()));
                let (uri, name) = (source.uri.clone(), file.name.clone());
                tokio::spawn(async move {
                    let outcome = fetch(&ctx.http, &uri).await;
                    if let Err(e) = &outcome {
                        warn!(log, "pull failed"; "uri" => &uri, "error" => e);
                    }
                    let mut state = ctx.vapi.lock().await;
                    if let Err(e) = state.transfer.pulled(&id, &name, outcome) {
                        warn!(log, "pulled file dropped"; "error" => %e);
                    }
                });
            }
            let value = serde_json::to_value(file)
                .map_err(|e| HttpError::for_internal_error(e.to_string()))?;
            Ok(HttpResponseOk(value))
        }
        "remove" => {
            let req: FileNameBody = decode(&body)?;
            state.transfer.remove_file(&id, &req.file_name)?;
            Ok(HttpResponseOk(Value::Null))
        }
        other => Err(unknown_action(other).into()),
    }
}

#[endpoint {
    method = GET,
    path = "/api/content/update-session/{session_id}/file/{file_name}",
}]
pub async fn update_file_get(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<FilePath>,
) -> std::result::Result<HttpResponseOk<UpdateFile>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let path = path.into_inner();
    Ok(HttpResponseOk(state.transfer.file(&path.session_id, &path.file_name)?))
}

/// Upload target of pushed files. The session id in the path authorizes
/// the transfer.
#[endpoint {
    method = PUT,
    path = "/cls/data/{session_id}/{file_name}",
    unpublished = true,
}]
pub async fn upload_data(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<FilePath>,
    body: UntypedBody,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let path = path.into_inner();
    let data = Bytes::copy_from_slice(body.as_bytes());
    let mut state = rqctx.context().vapi.lock().await;
    state.transfer.receive(&path.session_id, &path.file_name, data)?;
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = GET,
    path = "/api/content/download-session",
}]
pub async fn download_list(
    rqctx: RequestContext<Arc<Context>>,
) -> std::result::Result<HttpResponseOk<Vec<String>>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.transfer.downloads()))
}

#[endpoint {
    method = POST,
    path = "/api/content/download-session",
}]
pub async fn download_create(
    rqctx: RequestContext<Arc<Context>>,
    body: TypedBody<DownloadSessionCreate>,
) -> std::result::Result<HttpResponseOk<String>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let lifetime = rqctx.context().config.session.transfer_expiration();
    let item = body.into_inner().create_spec.library_item_id;
    let state = &mut *state;
    let id = state.transfer.create_download(&mut state.library, &item, lifetime)?;
    Ok(HttpResponseOk(id))
}

#[endpoint {
    method = GET,
    path = "/api/content/download-session/{session_id}",
}]
pub async fn download_get(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<SessionPath>,
) -> std::result::Result<HttpResponseOk<DownloadSession>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.transfer.download(&path.into_inner().session_id)?))
}

/// `action=keep-alive|cancel|fail`.
#[endpoint {
    method = POST,
    path = "/api/content/download-session/{session_id}",
}]
pub async fn download_action(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<SessionPath>,
    query: Query<ActionQuery>,
) -> std::result::Result<HttpResponseUpdatedNoContent, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let lifetime = rqctx.context().config.session.transfer_expiration();
    let query = query.into_inner();
    state
        .transfer
        .download_action(&path.into_inner().session_id, action(&query), lifetime)?;
    Ok(HttpResponseUpdatedNoContent())
}

#[endpoint {
    method = DELETE,
    path = "/api/content/download-session/{session_id}",
}]
pub async fn download_delete(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<SessionPath>,
) -> std::result::Result<HttpResponseDeleted, HttpError> {
    let mut state = authorize(&rqctx).await?;
    state.transfer.delete_download(&path.into_inner().session_id)?;
    Ok(HttpResponseDeleted())
}

#[endpoint {
    method = GET,
    path = "/api/content/download-session/{session_id}/file",
}]
pub async fn download_files(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<SessionPath>,
) -> std::result::Result<HttpResponseOk<Vec<DownloadFile>>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    Ok(HttpResponseOk(state.transfer.download_files(&path.into_inner().session_id)?))
}

/// `action=prepare` with a file name.
#[endpoint {
    method = POST,
    path = "/api/content/download-session/{session_id}/file",
}]
pub async fn download_file_action(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<SessionPath>,
    query: Query<ActionQuery>,
    body: TypedBody<FileNameBody>,
) -> std::result::Result<HttpResponseOk<DownloadFile>, HttpError> {
    let base = rqctx.context().url();
    let mut state = authorize(&rqctx).await?;
    let id = path.into_inner().session_id;
    let query = query.into_inner();
    match action(&query) {
        "prepare" => {
            let file = state.transfer.prepare(&id, &body.into_inner().file_name, &base)?;
            Ok(HttpResponseOk(file))
        }
        other => Err(unknown_action(other).into()),
    }
}

#[endpoint {
    method = GET,
    path = "/api/content/download-session/{session_id}/file/{file_name}",
}]
pub async fn download_file_get(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<FilePath>,
) -> std::result::Result<HttpResponseOk<DownloadFile>, HttpError> {
    let mut state = authorize(&rqctx).await?;
    let path = path.into_inner();
    Ok(HttpResponseOk(state.transfer.download_file(&path.session_id, &path.file_name)?))
}

/// Serves a prepared file of a download session.
#[endpoint {
    method = GET,
    path = "/cls/download/{session_id}/{file_name}",
    unpublished = true,
}]
pub async fn download_data(
    rqctx: RequestContext<Arc<Context>>,
    path: Path<FilePath>,
) -> std::result::Result<http::Response<Body>, HttpError> {
    let path = path.into_inner();
    let mut state = rqctx.context().vapi.lock().await;
    let state = &mut *state;
    let data = state.transfer.serve(&state.library, &path.session_id, &path.file_name)?;
    http::Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(data))
        .map_err(|e| HttpError::for_internal_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vim_api_types::vapi::library::{
        ItemCreateSpec, LocalLibraryCreateSpec, PublishInfo, SubscribedLibraryCreateSpec,
        SubscriptionInfo,
    };

    const BASE: &str = "http://127.0.0.1:8989";
    const HOUR: Duration = Duration::from_secs(3600);

    fn library_with_item() -> (library::Store, String, String) {
        let mut library = library::Store::default();
        let lib = library
            .create_local(
                LocalLibraryCreateSpec {
                    name: "isos".into(),
                    publish_info: Some(PublishInfo { published: true, ..Default::default() }),
                    ..Default::default()
                },
                BASE,
            )
            .unwrap();
        let item = library
            .create_item(ItemCreateSpec {
                library_id: lib.clone(),
                name: "ubuntu".into(),
                kind: "iso".into(),
                ..Default::default()
            })
            .unwrap();
        (library, lib, item)
    }

    fn push(name: &str) -> FileSpec {
        FileSpec {
            name: name.into(),
            source_type: SourceType::Push,
            source_endpoint: None,
            size: None,
        }
    }

    #[test]
    fn endpoint_uris_escape_file_names() {
        let (library, _, item) = library_with_item();
        let mut store = Store::default();
        let id = store.create_update(&library, &item, HOUR).unwrap();
        let file = store.add_file(&id, push("disk 1/#a.iso"), BASE).unwrap();
        assert_eq!(
            file.upload_endpoint.unwrap().uri,
            format!("{BASE}/cls/data/{id}/disk%201%2F%23a.iso")
        );
        assert_eq!(store.file(&id, "disk 1/#a.iso").unwrap().name, "disk 1/#a.iso");
    }

    #[test]
    fn push_and_complete() {
        let (mut library, _, item) = library_with_item();
        let mut store = Store::default();
        let id = store.create_update(&library, &item, HOUR).unwrap();
        assert_eq!(store.update(&id).unwrap().library_item_content_version, "1");

        let file = store.add_file(&id, push("disk.iso"), BASE).unwrap();
        assert_eq!(file.status, TransferStatus::WaitingForTransfer);
        assert_eq!(
            file.upload_endpoint.unwrap().uri,
            format!("{BASE}/cls/data/{id}/disk.iso")
        );
        assert!(matches!(store.complete(&mut library, &id), Err(Error::NotAllowed(_))));

        store.receive(&id, "disk.iso", Bytes::from_static(b"iso9660")).unwrap();
        assert_eq!(store.file(&id, "disk.iso").unwrap().status, TransferStatus::Ready);
        store.complete(&mut library, &id).unwrap();

        let session = store.update(&id).unwrap();
        assert_eq!(session.state, SessionState::Done);
        assert_eq!(library.item(&item).unwrap().info.size, 7);
        assert_eq!(library.item(&item).unwrap().info.content_version, "2");
        assert!(matches!(store.cancel(&id), Err(Error::NotAllowed(_))));
    }

    #[test]
    fn pull_outcomes() {
        let (library, _, item) = library_with_item();
        let mut store = Store::default();
        let id = store.create_update(&library, &item, HOUR).unwrap();

        let missing = FileSpec { source_type: SourceType::Pull, ..push("a") };
        assert!(matches!(store.add_file(&id, missing, BASE), Err(Error::InvalidArgument(_))));

        let pull = FileSpec {
            source_type: SourceType::Pull,
            source_endpoint: Some(TransferEndpoint {
                uri: "http://source/a".into(),
                ssl_certificate_thumbprint: None,
            }),
            ..push("a")
        };
        let file = store.add_file(&id, pull, BASE).unwrap();
        assert_eq!(file.status, TransferStatus::Transferring);
        assert!(matches!(
            store.receive(&id, "a", Bytes::new()),
            Err(Error::NotAllowed(_))
        ));

        store.pulled(&id, "a", Err("connection refused".into())).unwrap();
        let file = store.file(&id, "a").unwrap();
        assert_eq!(file.status, TransferStatus::Error);
        assert_eq!(file.error_message.as_deref(), Some("connection refused"));

        store.pulled(&id, "a", Ok(Bytes::from_static(b"abc"))).unwrap();
        assert_eq!(store.file(&id, "a").unwrap().bytes_transferred, 3);

        store.fail(&id, "gave up".into()).unwrap();
        assert_eq!(store.update(&id).unwrap().state, SessionState::Error);
    }

    #[test]
    fn subscribed_items_reject_updates() {
        let (mut library, lib, item) = library_with_item();
        let sub = library
            .create_subscribed(SubscribedLibraryCreateSpec {
                name: "mirror".into(),
                subscription_info: SubscriptionInfo {
                    subscription_url: format!("{BASE}/cls/vcsp/lib/{lib}/lib.json"),
                    on_demand: true,
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        let copy = library.items(&sub).unwrap()[0].clone();
        let mut store = Store::default();
        assert!(matches!(
            store.create_update(&library, &copy, HOUR),
            Err(Error::NotAllowed(_))
        ));
        assert!(store.create_update(&library, &item, HOUR).is_ok());
    }

    #[test]
    fn downloads_need_preparation() {
        let (mut library, _, item) = library_with_item();
        library
            .apply_files(&item, vec![("disk.iso".into(), Bytes::from_static(b"payload"))])
            .unwrap();
        let mut store = Store::default();
        let id = store.create_download(&mut library, &item, HOUR).unwrap();

        let files = store.download_files(&id).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].status, PrepareStatus::Unprepared);
        assert!(matches!(
            store.serve(&library, &id, "disk.iso"),
            Err(Error::NotAllowed(_))
        ));

        let file = store.prepare(&id, "disk.iso", BASE).unwrap();
        assert_eq!(
            file.download_endpoint.unwrap().uri,
            format!("{BASE}/cls/download/{id}/disk.iso")
        );
        assert_eq!(store.serve(&library, &id, "disk.iso").unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(store.download_file(&id, "disk.iso").unwrap().bytes_transferred, 7);

        store.download_action(&id, "keep-alive", HOUR).unwrap();
        store.delete_download(&id).unwrap();
        assert!(matches!(store.download(&id), Err(Error::NotFound(_))));
    }

    #[test]
    fn expired_sessions_are_dropped() {
        let (library, _, item) = library_with_item();
        let mut store = Store::default();
        let id = store.create_update(&library, &item, Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.updates().is_empty());
        assert!(matches!(store.update(&id), Err(Error::NotFound(_))));
    }
}
