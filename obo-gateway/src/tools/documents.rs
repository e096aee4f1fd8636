//! `get_documents`: permission-trimmed document search
//!
//! The search service filters results to what the calling user may see,
//! based on the delegated token passed in `x-ms-query-source-authorization`.

use super::read_json;
use crate::config::SearchConfig;
use crate::error::{DownstreamError, OperationError};
use crate::orchestrator::{DownstreamContext, Operation};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Scope delegated to for document search
pub const SEARCH_SCOPE: &str = "https://search.azure.com/.default";

/// Header carrying the user's delegated token
pub const QUERY_SOURCE_HEADER: &str = "x-ms-query-source-authorization";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    #[serde(default = "match_all")]
    query: String,
}

fn match_all() -> String {
    "*".to_string()
}

fn parse_params(params: &Value) -> Result<Params, String> {
    let params = if params.is_null() { json!({}) } else { params.clone() };
    serde_json::from_value(params).map_err(|e| e.to_string())
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<Document>,
}

/// A document visible to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document name
    #[serde(default)]
    pub name: Option<String>,

    /// Owning object id
    #[serde(default)]
    pub oid: Option<Value>,

    /// Groups granted access
    #[serde(default)]
    pub group: Option<Value>,
}

/// Search the document index as the calling user
pub struct GetDocuments {
    search: SearchConfig,
}

impl GetDocuments {
    /// Create the operation
    pub fn new(search: SearchConfig) -> Self {
        Self { search }
    }

    fn search_url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.search.endpoint.trim_end_matches('/'),
            self.search.index_name,
            self.search.api_version
        )
    }
}

#[async_trait]
impl Operation for GetDocuments {
    fn name(&self) -> &str {
        "get_documents"
    }

    fn description(&self) -> &str {
        "Retrieve documents the calling user is permitted to see"
    }

    fn required_scopes(&self) -> Vec<String> {
        vec![SEARCH_SCOPE.to_string()]
    }

    fn check_params(&self, params: &Value) -> Result<(), String> {
        parse_params(params).map(|_| ())
    }

    async fn call(&self, ctx: &DownstreamContext, params: Value) -> Result<Value, OperationError> {
        let params = parse_params(&params).map_err(OperationError::InvalidParams)?;
        let token = ctx.token_for(SEARCH_SCOPE)?;

        debug!(query = %params.query, index = %self.search.index_name, "Searching documents");

        let mut request = ctx
            .http()
            .post(self.search_url())
            .header(QUERY_SOURCE_HEADER, token.expose_secret())
            .json(&json!({
                "search": params.query,
                "select": "name,oid,group",
                "orderby": "id asc",
            }));

        if let Some(key) = &self.search.api_key {
            request = request.header("api-key", key.expose_secret());
        }

        let response = request.send().await.map_err(DownstreamError::from)?;
        let response: SearchResponse = read_json(response).await?;

        debug!(count = response.value.len(), "Documents returned");

        Ok(json!({ "documents": response.value }))
    }
}
