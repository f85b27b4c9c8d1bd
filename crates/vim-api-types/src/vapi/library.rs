// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Content library service types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LibraryType {
    Local,
    Subscribed,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationMethod {
    #[default]
    None,
    Basic,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct StorageBacking {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct PublishInfo {
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub authentication_method: AuthenticationMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub subscription_url: String,
    #[serde(default)]
    pub authentication_method: AuthenticationMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub on_demand: bool,
    #[serde(default)]
    pub automatic_sync_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_thumbprint: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: LibraryType,
    #[serde(default)]
    pub storage_backings: Vec<StorageBacking>,
    pub version: String,
    pub creation_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_info: Option<PublishInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_info: Option<SubscriptionInfo>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct LocalLibraryCreateSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub storage_backings: Vec<StorageBacking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_info: Option<PublishInfo>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct SubscribedLibraryCreateSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub storage_backings: Vec<StorageBacking>,
    pub subscription_info: SubscriptionInfo,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct LocalLibraryCreate {
    pub create_spec: LocalLibraryCreateSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct SubscribedLibraryCreate {
    pub create_spec: SubscribedLibraryCreateSpec,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct LibraryUpdateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_info: Option<PublishInfo>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct LibraryUpdate {
    pub update_spec: LibraryUpdateSpec,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct LibraryFind {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<LibraryType>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct LibraryFindBody {
    pub spec: LibraryFind,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct Item {
    pub id: String,
    pub library_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub size: i64,
    pub cached: bool,
    pub content_version: String,
    pub metadata_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ItemCreateSpec {
    pub library_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ItemCreate {
    pub create_spec: ItemCreateSpec,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ItemUpdateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ItemUpdate {
    pub update_spec: ItemUpdateSpec,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ItemFind {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ItemFindBody {
    pub spec: ItemFind,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
pub struct ItemSyncBody {
    #[serde(default)]
    pub force_sync_content: bool,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
pub struct LibraryItemQuery {
    #[serde(default)]
    pub library_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

/// A file stored in a library item.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ItemFile {
    pub name: String,
    pub size: i64,
    pub cached: bool,
    pub version: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Active,
    Done,
    Error,
    Canceled,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct UpdateSession {
    pub id: String,
    pub library_item_id: String,
    pub library_item_content_version: String,
    pub state: SessionState,
    pub client_progress: i64,
    pub expiration_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct UpdateSessionCreateSpec {
    pub library_item_id: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct UpdateSessionCreate {
    pub create_spec: UpdateSessionCreateSpec,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Push,
    Pull,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct TransferEndpoint {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_certificate_thumbprint: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct FileSpec {
    pub name: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_endpoint: Option<TransferEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct FileSpecBody {
    pub file_spec: FileSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct FileNameBody {
    pub file_name: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    WaitingForTransfer,
    Transferring,
    Ready,
    Validating,
    Error,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct UpdateFile {
    pub name: String,
    pub source_type: SourceType,
    pub status: TransferStatus,
    pub bytes_transferred: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_endpoint: Option<TransferEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_endpoint: Option<TransferEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DownloadSession {
    pub id: String,
    pub library_item_id: String,
    pub library_item_content_version: String,
    pub state: SessionState,
    pub client_progress: i64,
    pub expiration_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct DownloadSessionCreate {
    pub create_spec: UpdateSessionCreateSpec,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrepareStatus {
    Unprepared,
    PrepareRequested,
    Preparing,
    Prepared,
    Error,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DownloadFile {
    pub name: String,
    pub size: i64,
    pub status: PrepareStatus,
    pub bytes_transferred: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_endpoint: Option<TransferEndpoint>,
}
