use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use client_core::{ChangeSubscription, RemoteDataService};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use shared::{
    domain::Item,
    error::{ErrorCode, RemoteCallError},
    protocol::{ChangeKind, CreateItemInput, DeleteItemInput, UpdateItemInput},
};
use tracing::debug;
use url::Url;

pub mod documents;
mod subscription;

const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct GraphQlEndpoint {
    pub url: String,
    pub api_key: Option<String>,
    pub realtime_url: Option<String>,
}

impl GraphQlEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            realtime_url: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_realtime_url(mut self, realtime_url: impl Into<String>) -> Self {
        self.realtime_url = Some(realtime_url.into());
        self
    }

    /// Websocket endpoint for subscriptions, derived from the HTTP
    /// endpoint unless set explicitly.
    pub(crate) fn realtime_url(&self) -> Result<Url> {
        if let Some(explicit) = &self.realtime_url {
            return Url::parse(explicit).context("invalid realtime endpoint url");
        }
        let mut url = Url::parse(&self.url).context("invalid graphql endpoint url")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => bail!("unsupported graphql endpoint scheme '{other}'"),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("failed to derive websocket scheme for {}", self.url))?;
        Ok(url)
    }
}

/// Remote Data Service against a GraphQL endpoint of the managed
/// backend's shape: queries and mutations over HTTP POST, subscriptions
/// over `graphql-transport-ws`.
pub struct GraphQlRemote {
    http: Client,
    endpoint: GraphQlEndpoint,
}

impl GraphQlRemote {
    pub fn new(endpoint: GraphQlEndpoint) -> Arc<Self> {
        Arc::new(Self {
            http: Client::new(),
            endpoint,
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        document: &'static str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let mut request = self.http.post(&self.endpoint.url).json(&GraphQlRequest {
            query: document,
            variables,
        });
        if let Some(api_key) = &self.endpoint.api_key {
            request = request.header("x-api-key", api_key);
        }

        let response: GraphQlResponse<T> = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(errors) = response.errors.filter(|errors| !errors.is_empty()) {
            return Err(map_graphql_errors(errors).into());
        }
        response
            .data
            .ok_or_else(|| anyhow!("graphql response carried neither data nor errors"))
    }
}

#[derive(Serialize)]
struct GraphQlRequest {
    query: &'static str,
    variables: serde_json::Value,
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
}

#[derive(Deserialize)]
struct ListItemsData {
    #[serde(rename = "listItems")]
    list_items: ItemPage,
}

#[derive(Deserialize)]
struct ItemPage {
    items: Vec<Item>,
    #[serde(rename = "nextToken", default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
struct CreateItemData {
    #[serde(rename = "createItem")]
    create_item: Item,
}

#[derive(Deserialize)]
struct UpdateItemData {
    #[serde(rename = "updateItem")]
    update_item: Item,
}

#[derive(Deserialize)]
struct DeleteItemData {
    #[serde(rename = "deleteItem")]
    delete_item: Item,
}

#[async_trait]
impl RemoteDataService for GraphQlRemote {
    async fn list_items(&self) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let data: ListItemsData = self
                .execute(
                    documents::LIST_ITEMS,
                    json!({ "limit": DEFAULT_PAGE_SIZE, "nextToken": next_token }),
                )
                .await
                .context("listItems query failed")?;
            items.extend(data.list_items.items);
            next_token = data.list_items.next_token;
            if next_token.is_none() {
                break;
            }
            debug!("following listItems pagination token");
        }
        Ok(items)
    }

    async fn create_item(&self, input: CreateItemInput) -> Result<Item> {
        let data: CreateItemData = self
            .execute(documents::CREATE_ITEM, json!({ "input": input }))
            .await
            .context("createItem mutation failed")?;
        Ok(data.create_item)
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<Item> {
        let data: UpdateItemData = self
            .execute(documents::UPDATE_ITEM, json!({ "input": input }))
            .await
            .context("updateItem mutation failed")?;
        Ok(data.update_item)
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<Item> {
        let data: DeleteItemData = self
            .execute(documents::DELETE_ITEM, json!({ "input": input }))
            .await
            .context("deleteItem mutation failed")?;
        Ok(data.delete_item)
    }

    async fn subscribe_changes(&self, kind: ChangeKind) -> Result<Box<dyn ChangeSubscription>> {
        let subscription = subscription::GraphQlSubscription::connect(&self.endpoint, kind).await?;
        Ok(Box::new(subscription))
    }
}

fn map_graphql_errors(errors: Vec<GraphQlError>) -> RemoteCallError {
    let code = classify_error_type(errors[0].error_type.as_deref());
    let message = errors
        .iter()
        .map(|error| error.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    RemoteCallError::new(code, message)
}

fn classify_error_type(error_type: Option<&str>) -> ErrorCode {
    let Some(error_type) = error_type else {
        return ErrorCode::Internal;
    };
    let lower = error_type.to_ascii_lowercase();
    if lower.contains("unauthorized") || lower.contains("forbidden") {
        ErrorCode::Unauthorized
    } else if lower.contains("throttl") {
        ErrorCode::Throttled
    } else if lower.contains("notfound") || lower.contains("not_found") {
        ErrorCode::NotFound
    } else if lower.contains("validation") || lower.contains("conditionalcheckfailed") {
        ErrorCode::Validation
    } else if lower.contains("unavailable") || lower.contains("timeout") {
        ErrorCode::Unavailable
    } else {
        ErrorCode::Internal
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
