use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::gateway::{AuthRequiredError, TaskGateway, TaskPatch};
use crate::models::{Collection, RemoteStatus, RemoteTask};

pub const DEFAULT_API_BASE: &str = "https://tasks.googleapis.com/tasks/v1";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RESULTS: u32 = 100;

/// OAuth credentials as persisted by the interactive authorization flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(alias = "token")]
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
}

/// Task list resource on the wire.
#[derive(Debug, Default, Deserialize)]
struct ApiCollection {
    id: String,
    #[serde(default)]
    title: String,
}

/// Task resource on the wire. Everything but `id` and `title` is optional.
#[derive(Debug, Default, Deserialize)]
struct ApiTask {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: RemoteStatus,
    due: Option<String>,
    completed: Option<String>,
    notes: Option<String>,
    parent: Option<String>,
    position: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiListResponse<T> {
    #[serde(default)]
    items: Vec<T>,
}

/// Blocking REST client for a Google-Tasks-style service.
///
/// Lives on the sync worker thread; every call is synchronous and bounded by
/// [`REQUEST_TIMEOUT`]. Network and server failures are logged and reported
/// through the gateway contract's sentinels, never as panics or errors.
pub struct RestGateway {
    client: Client,
    api_base: String,
    token_path: PathBuf,
    token: Mutex<Option<StoredToken>>,
}

impl RestGateway {
    pub fn new(token_path: PathBuf) -> Self {
        Self::with_api_base(token_path, DEFAULT_API_BASE)
    }

    pub fn with_api_base(token_path: PathBuf, api_base: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                log::warn!("falling back to default http client: {err}");
                Client::new()
            });
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token_path,
            token: Mutex::new(None),
        }
    }

    fn load_token(&self) -> Option<StoredToken> {
        let buf = match fs::read_to_string(&self.token_path) {
            Ok(buf) => buf,
            Err(err) => {
                log::debug!("no stored token at {}: {err}", self.token_path.display());
                return None;
            }
        };
        match serde_json::from_str(&buf) {
            Ok(token) => Some(token),
            Err(err) => {
                log::warn!("stored token is unreadable: {err}");
                None
            }
        }
    }

    fn persist_token(&self, token: &StoredToken) {
        match serde_json::to_vec_pretty(token) {
            Ok(json) => {
                if let Err(err) = fs::write(&self.token_path, json) {
                    log::warn!("could not persist refreshed token: {err}");
                }
            }
            Err(err) => log::warn!("could not serialize refreshed token: {err}"),
        }
    }

    fn access_token(&self) -> Option<String> {
        let mut guard = self.token.lock().expect("token poisoned");
        if guard.is_none() {
            *guard = self.load_token();
        }
        guard.as_ref().map(|t| t.access_token.clone())
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Option<T> {
        let token = self.access_token()?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .and_then(|r| r.error_for_status());
        match response {
            Ok(response) => match response.json() {
                Ok(value) => Some(value),
                Err(err) => {
                    log::error!("malformed response from {url}: {err}");
                    None
                }
            },
            Err(err) => {
                log::error!("request to {url} failed: {err}");
                None
            }
        }
    }

    fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::blocking::RequestBuilder,
        what: &str,
    ) -> Option<T> {
        let token = self.access_token()?;
        let response = request
            .bearer_auth(token)
            .send()
            .and_then(|r| r.error_for_status());
        match response {
            Ok(response) => match response.json() {
                Ok(value) => Some(value),
                Err(err) => {
                    log::error!("malformed response while {what}: {err}");
                    None
                }
            },
            Err(err) => {
                log::error!("{what} failed: {err}");
                None
            }
        }
    }
}

impl TaskGateway for RestGateway {
    fn is_available(&self) -> bool {
        self.token_path.exists()
    }

    fn authenticate(&self) -> Result<bool, AuthRequiredError> {
        let Some(mut token) = self.load_token() else {
            return Err(AuthRequiredError::new(
                "no stored credentials; sign in to the remote service",
            ));
        };

        let Some(refresh_token) = token.refresh_token.clone() else {
            // Nothing to refresh with; trust the access token until a request
            // proves it stale.
            *self.token.lock().expect("token poisoned") = Some(token);
            return Ok(true);
        };

        let response = self
            .client
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", token.client_id.as_str()),
                ("client_secret", token.client_secret.as_str()),
            ])
            .send();

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                log::warn!("token refresh unreachable: {err}");
                return Ok(false);
            }
        };

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(AuthRequiredError::new(
                "stored credentials were rejected; sign in again",
            )),
            status if !status.is_success() => {
                log::warn!("token refresh returned {status}");
                Ok(false)
            }
            _ => match response.json::<TokenRefreshResponse>() {
                Ok(refreshed) => {
                    token.access_token = refreshed.access_token;
                    self.persist_token(&token);
                    *self.token.lock().expect("token poisoned") = Some(token);
                    Ok(true)
                }
                Err(err) => {
                    log::warn!("token refresh response malformed: {err}");
                    Ok(false)
                }
            },
        }
    }

    fn list_collections(&self) -> Vec<Collection> {
        let url = format!("{}/users/@me/lists", self.api_base);
        let response: Option<ApiListResponse<ApiCollection>> = self.get_json(&url);
        response
            .map(|r| {
                r.items
                    .into_iter()
                    .map(|c| Collection {
                        id: c.id,
                        title: c.title,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn list_tasks(
        &self,
        collection_id: &str,
        include_completed: bool,
        include_hidden: bool,
    ) -> Vec<RemoteTask> {
        let url = format!(
            "{}/lists/{collection_id}/tasks?maxResults={MAX_RESULTS}&showCompleted={include_completed}&showHidden={include_hidden}",
            self.api_base
        );
        let response: Option<ApiListResponse<ApiTask>> = self.get_json(&url);
        response
            .map(|r| {
                r.items
                    .into_iter()
                    .map(|t| into_remote(t, collection_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn add_task(
        &self,
        title: &str,
        due_date: Option<NaiveDate>,
        collection_id: &str,
    ) -> Option<RemoteTask> {
        let url = format!("{}/lists/{collection_id}/tasks", self.api_base);
        let mut body = json!({ "title": title });
        if let Some(due) = due_date {
            body["due"] = json!(format_due(due));
        }
        let task: ApiTask = self.send_json(self.client.post(url).json(&body), "creating task")?;
        Some(into_remote(task, collection_id))
    }

    fn update_task(
        &self,
        remote_id: &str,
        patch: &TaskPatch,
        collection_id: &str,
    ) -> Option<RemoteTask> {
        let url = format!("{}/lists/{collection_id}/tasks/{remote_id}", self.api_base);
        // Read-modify-write: the service's update is a full PUT, so start
        // from the current resource and apply only the patched fields.
        let mut current: Value = self.get_json(&url)?;
        apply_patch(&mut current, patch);
        let task: ApiTask =
            self.send_json(self.client.put(url).json(&current), "updating task")?;
        Some(into_remote(task, collection_id))
    }
}

fn into_remote(task: ApiTask, collection_id: &str) -> RemoteTask {
    RemoteTask {
        id: task.id,
        title: task.title,
        status: task.status,
        collection_id: collection_id.to_string(),
        due: task.due.as_deref().and_then(parse_due),
        completed: task.completed,
        notes: task.notes.unwrap_or_default(),
        parent: task.parent,
        position: task.position,
    }
}

/// The service reports `due` as a date with a meaningless midnight-UTC time
/// part; only the date part carries information.
fn parse_due(value: &str) -> Option<NaiveDate> {
    let date_part = value.split('T').next().unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn format_due(due: NaiveDate) -> String {
    format!("{due}T00:00:00.000Z")
}

fn apply_patch(resource: &mut Value, patch: &TaskPatch) {
    if let Some(title) = &patch.title {
        resource["title"] = json!(title);
    }
    if let Some(status) = patch.status {
        match status {
            RemoteStatus::Completed => {
                resource["status"] = json!("completed");
            }
            RemoteStatus::NeedsAction => {
                resource["status"] = json!("needsAction");
                // A reopened task must not keep a completion instant.
                if let Some(map) = resource.as_object_mut() {
                    map.remove("completed");
                }
            }
        }
    }
    if let Some(due) = patch.due {
        resource["due"] = match due {
            Some(date) => json!(format_due(date)),
            None => Value::Null,
        };
    }
    if let Some(notes) = &patch.notes {
        resource["notes"] = json!(notes);
    }
}
