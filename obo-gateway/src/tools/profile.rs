//! `get_user_profile`: the caller's directory profile

use super::read_json;
use crate::config::GraphConfig;
use crate::error::{DownstreamError, OperationError};
use crate::orchestrator::{DownstreamContext, Operation};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scope delegated to for directory lookups
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Profile fields returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Directory object id
    pub id: String,

    /// Display name
    #[serde(default)]
    pub display_name: Option<String>,

    /// Primary mail address
    #[serde(default)]
    pub mail: Option<String>,

    /// Sign-in name
    #[serde(default)]
    pub user_principal_name: Option<String>,

    /// Job title
    #[serde(default)]
    pub job_title: Option<String>,
}

/// Fetch the calling user's profile
pub struct GetUserProfile {
    graph: GraphConfig,
}

impl GetUserProfile {
    /// Create the operation
    pub fn new(graph: GraphConfig) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Operation for GetUserProfile {
    fn name(&self) -> &str {
        "get_user_profile"
    }

    fn description(&self) -> &str {
        "Return the calling user's directory profile"
    }

    fn required_scopes(&self) -> Vec<String> {
        vec![GRAPH_SCOPE.to_string()]
    }

    fn check_params(&self, params: &Value) -> Result<(), String> {
        match params {
            Value::Null => Ok(()),
            Value::Object(map) if map.is_empty() => Ok(()),
            _ => Err("get_user_profile takes no parameters".to_string()),
        }
    }

    async fn call(&self, ctx: &DownstreamContext, _params: Value) -> Result<Value, OperationError> {
        let token = ctx.token_for(GRAPH_SCOPE)?;
        let url = format!("{}/v1.0/me", self.graph.base_url.trim_end_matches('/'));

        let response = ctx
            .http()
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(DownstreamError::from)?;

        let profile: UserProfile = read_json(response).await?;

        serde_json::to_value(profile).map_err(|e| DownstreamError::Decode(e.to_string()).into())
    }
}
