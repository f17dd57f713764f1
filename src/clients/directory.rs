//! User/team directory client.
//!
//! Resolves a submitter's identity to their teams and a team to its
//! membership roster. Absence of a user or team is a normal outcome, not a
//! fault; HTTP 404 maps to `None`/empty rather than an error.

use async_trait::async_trait;
use backon::Retryable;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use super::{ClientError, HttpClientConfig, Result};

/// A directory user.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
}

/// Organization reference carried by a team.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRef {
    pub name: String,
}

/// A directory team.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub organization: Option<OrganizationRef>,
}

/// Interface for user/team resolution.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve a username to a user, if one exists.
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// All teams the user belongs to.
    async fn find_teams_by_user(&self, user_id: Uuid) -> Result<Vec<Team>>;

    /// A team's membership roster.
    async fn find_users_by_team(&self, team_id: Uuid) -> Result<Vec<User>>;
}

/// Directory client backed by the user-manager HTTP API.
pub struct HttpDirectory {
    client: reqwest::Client,
    config: HttpClientConfig,
}

impl HttpDirectory {
    /// Create a new directory client.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = config.build_client()?;
        Ok(Self { client, config })
    }

    /// GET a JSON resource; 404 maps to `None`.
    async fn get_optional<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(url = %url, "Directory resource not found");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }

        Ok(Some(response.json().await?))
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let url = format!("{}/users/{}", self.config.base_url, username);
        self.get_optional(&url).await
    }

    async fn get_teams(&self, user_id: Uuid) -> Result<Vec<Team>> {
        let url = format!("{}/users/{}/teams", self.config.base_url, user_id);
        Ok(self.get_optional(&url).await?.unwrap_or_default())
    }

    async fn get_members(&self, team_id: Uuid) -> Result<Vec<User>> {
        let url = format!("{}/teams/{}/members", self.config.base_url, team_id);
        Ok(self.get_optional(&url).await?.unwrap_or_default())
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        (|| async { self.get_user(username).await })
            .retry(super::backoff())
            .when(ClientError::is_retryable)
            .await
    }

    async fn find_teams_by_user(&self, user_id: Uuid) -> Result<Vec<Team>> {
        (|| async { self.get_teams(user_id).await })
            .retry(super::backoff())
            .when(ClientError::is_retryable)
            .await
    }

    async fn find_users_by_team(&self, team_id: Uuid) -> Result<Vec<User>> {
        (|| async { self.get_members(team_id).await })
            .retry(super::backoff())
            .when(ClientError::is_retryable)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_decode_with_organization() {
        let json = r#"{
            "id": "8b9bba9e-3f24-4ba3-a8f3-fb2c2d4d4a31",
            "name": "Platform",
            "organization": {"name": "Acme"}
        }"#;
        let team: Team = serde_json::from_str(json).unwrap();

        assert_eq!(team.name, "Platform");
        assert_eq!(team.organization.unwrap().name, "Acme");
    }

    #[test]
    fn test_team_decode_without_organization() {
        let json = r#"{
            "id": "8b9bba9e-3f24-4ba3-a8f3-fb2c2d4d4a31",
            "name": "Platform"
        }"#;
        let team: Team = serde_json::from_str(json).unwrap();

        assert!(team.organization.is_none());
    }
}
