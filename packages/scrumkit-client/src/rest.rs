/// Persistence over the hosted backend's REST API.
///
/// Tables are served PostgREST-style under `/rest/v1/<table>` with
/// `column=eq.value` filters. A drag is applied through the `move_items`
/// database function so the whole batch commits in one transaction. The
/// session probe only asks whether the auth endpoint answers: an anonymous
/// client is rejected there but still connected.
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use scrumkit_core::positions::MovePlan;
use scrumkit_core::types::{BoardSettings, Column, Item, NewItem};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::config::ClientConfig;
use crate::error::StoreError;
use crate::store::{BoardStore, SessionProbe};

#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct SettingsRow {
    #[serde(default)]
    settings: Option<BoardSettings>,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let mut store = Self::new(&config.backend_url, &config.anon_key);
        store.access_token = config.access_token.clone();
        store
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        let response = check(self.authorize(request).send().await?).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(), StoreError> {
        check(self.authorize(request).send().await?).await?;
        Ok(())
    }
}

/// Map non-success responses to store errors, keeping the backend's message.
async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let path = response.url().path().to_string();
    let message = response.text().await.unwrap_or_default();
    log::warn!(
        target: "scrumkit.rest",
        "{} {} failed: {}",
        status.as_u16(),
        path,
        message
    );
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized,
        StatusCode::NOT_FOUND => StoreError::NotFound(path),
        _ => StoreError::Rejected {
            status: status.as_u16(),
            message,
        },
    })
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl BoardStore for RestStore {
    async fn list_columns(&self, board_id: &str) -> Result<Vec<Column>, StoreError> {
        let request = self.client.get(self.table_url("columns")).query(&[
            ("select", "*".to_string()),
            ("retrospective_id", eq(board_id)),
            ("order", "position.asc".to_string()),
        ]);
        self.fetch(request).await
    }

    async fn list_items(&self, board_id: &str) -> Result<Vec<Item>, StoreError> {
        let request = self.client.get(self.table_url("items")).query(&[
            ("select", "*,columns!inner(retrospective_id)".to_string()),
            ("columns.retrospective_id", eq(board_id)),
            ("order", "position.asc".to_string()),
        ]);
        self.fetch(request).await
    }

    async fn apply_move_plan(&self, plan: &MovePlan) -> Result<(), StoreError> {
        if plan.is_empty() {
            return Ok(());
        }
        let request = self
            .client
            .post(format!("{}/rest/v1/rpc/move_items", self.base_url))
            .json(&json!({ "plan": plan }));
        self.execute(request).await
    }

    async fn insert_item(&self, item: &NewItem) -> Result<Item, StoreError> {
        let request = self
            .client
            .post(self.table_url("items"))
            .header("Prefer", "return=representation")
            .json(item);
        let rows: Vec<Item> = self.fetch(request).await?;
        rows.into_iter().next().ok_or_else(|| StoreError::Rejected {
            status: 201,
            message: "insert returned no row".to_string(),
        })
    }

    async fn delete_item(&self, item_id: &str) -> Result<(), StoreError> {
        let request = self
            .client
            .delete(self.table_url("items"))
            .header("Prefer", "return=representation")
            .query(&[("id", eq(item_id))]);
        let rows: Vec<serde_json::Value> = self.fetch(request).await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(format!("items/{}", item_id)));
        }
        Ok(())
    }

    async fn read_settings(&self, board_id: &str) -> Result<BoardSettings, StoreError> {
        let request = self
            .client
            .get(self.table_url("retrospectives"))
            .query(&[("select", "settings".to_string()), ("id", eq(board_id))]);
        let rows: Vec<SettingsRow> = self.fetch(request).await?;
        match rows.into_iter().next() {
            Some(row) => Ok(row.settings.unwrap_or_default()),
            None => Err(StoreError::NotFound(format!("retrospectives/{}", board_id))),
        }
    }

    async fn write_settings(
        &self,
        board_id: &str,
        settings: &BoardSettings,
    ) -> Result<(), StoreError> {
        let request = self
            .client
            .patch(self.table_url("retrospectives"))
            .query(&[("id", eq(board_id))])
            .json(&json!({ "settings": settings }));
        self.execute(request).await
    }
}

#[async_trait]
impl SessionProbe for RestStore {
    async fn check_session(&self) -> Result<(), StoreError> {
        let request = self.client.get(format!("{}/auth/v1/user", self.base_url));
        let response = self.authorize(request).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(()),
            _ => check(response).await.map(|_| ()),
        }
    }
}
