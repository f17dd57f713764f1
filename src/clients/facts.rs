//! Fact store client.
//!
//! Stored submissions ("facts") are retrievable through a filtered search
//! over the fact-manager service. The query layer guarantees at most one
//! fact per user when `latest_by_user` is set; callers rely on that and do
//! not re-deduplicate.

use async_trait::async_trait;
use backon::Retryable;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{ClientError, HttpClientConfig, Result};

/// Named search parameters for fact retrieval.
///
/// Ephemeral: built per aggregation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactQuery {
    /// Source application discriminator.
    pub application: String,
    /// Organization scope.
    pub organization: Option<String>,
    /// Keep only each user's most recent matching fact.
    pub latest_by_user: bool,
    /// Group (topic) the facts were recorded under.
    pub group: Option<String>,
    /// Element name the facts must carry.
    pub element_name: Option<String>,
    /// Fact type discriminator.
    pub fact_type: Option<String>,
    /// Restrict to facts created by these users (team scoping).
    pub created_by: Vec<String>,
}

impl FactQuery {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            ..Default::default()
        }
    }

    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization;
        self
    }

    pub fn latest_by_user(mut self) -> Self {
        self.latest_by_user = true;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_element_name(mut self, element_name: impl Into<String>) -> Self {
        self.element_name = Some(element_name.into());
        self
    }

    pub fn with_fact_type(mut self, fact_type: impl Into<String>) -> Self {
        self.fact_type = Some(fact_type.into());
        self
    }

    pub fn with_created_by(mut self, created_by: Vec<String>) -> Self {
        self.created_by = created_by;
        self
    }

    /// Render as HTTP query parameters.
    pub(crate) fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("application", self.application.clone())];
        if let Some(ref organization) = self.organization {
            params.push(("organization", organization.clone()));
        }
        if self.latest_by_user {
            params.push(("latestByUser", "true".to_string()));
        }
        if let Some(ref group) = self.group {
            params.push(("group", group.clone()));
        }
        if let Some(ref element_name) = self.element_name {
            params.push(("elementName", element_name.clone()));
        }
        if let Some(ref fact_type) = self.fact_type {
            params.push(("factType", fact_type.clone()));
        }
        for created_by in &self.created_by {
            params.push(("createdBy", created_by.clone()));
        }
        params
    }
}

/// A previously stored submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFact {
    /// Serialized form payload (UTF-8 JSON).
    pub value: String,
    pub created_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl StoredFact {
    /// Build a fact directly from a payload (used by tests and mocks).
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            created_by: None,
            created_at: None,
        }
    }
}

/// Interface for querying stored submissions.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Return all stored facts matching the filter.
    async fn query(&self, filter: &FactQuery) -> Result<Vec<StoredFact>>;
}

/// Fact store client backed by the fact-manager HTTP API.
///
/// Queries `GET {base}/facts` with the filter as query parameters and
/// retries transient failures with exponential backoff.
pub struct HttpFactStore {
    client: reqwest::Client,
    config: HttpClientConfig,
}

impl HttpFactStore {
    /// Create a new fact store client.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = config.build_client()?;
        Ok(Self { client, config })
    }

    async fn get_facts(&self, filter: &FactQuery) -> Result<Vec<StoredFact>> {
        let url = format!("{}/facts", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .query(&filter.to_params())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }

        let facts: Vec<StoredFact> = response.json().await?;

        debug!(
            url = %url,
            fact_count = facts.len(),
            "Fact query completed"
        );

        Ok(facts)
    }
}

#[async_trait]
impl FactStore for HttpFactStore {
    async fn query(&self, filter: &FactQuery) -> Result<Vec<StoredFact>> {
        (|| async { self.get_facts(filter).await })
            .retry(super::backoff())
            .when(ClientError::is_retryable)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_full() {
        let query = FactQuery::new("BaseFormDroolsEngine")
            .with_organization(Some("Acme".to_string()))
            .latest_by_user()
            .with_group("form-results")
            .with_element_name("The 5 Frustrations on Teamworking")
            .with_fact_type("DroolsResultForm")
            .with_created_by(vec!["alice".to_string(), "bob".to_string()]);

        let params = query.to_params();

        assert!(params.contains(&("application", "BaseFormDroolsEngine".to_string())));
        assert!(params.contains(&("organization", "Acme".to_string())));
        assert!(params.contains(&("latestByUser", "true".to_string())));
        assert!(params.contains(&("group", "form-results".to_string())));
        assert!(params.contains(&("factType", "DroolsResultForm".to_string())));
        let created_by: Vec<_> = params.iter().filter(|(k, _)| *k == "createdBy").collect();
        assert_eq!(created_by.len(), 2);
    }

    #[test]
    fn test_query_params_omit_absent_fields() {
        let params = FactQuery::new("BaseFormDroolsEngine").to_params();

        assert_eq!(params, vec![("application", "BaseFormDroolsEngine".to_string())]);
    }

    #[test]
    fn test_stored_fact_decode() {
        let json = r#"{"value": "{\"tag\": \"x\"}", "createdBy": "alice"}"#;
        let fact: StoredFact = serde_json::from_str(json).unwrap();

        assert_eq!(fact.created_by.as_deref(), Some("alice"));
        assert!(fact.value.contains("tag"));
    }
}
