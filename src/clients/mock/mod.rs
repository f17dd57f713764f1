//! Mock client implementations for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::directory::{Directory, Team, User};
use super::facts::{FactQuery, FactStore, StoredFact};
use super::{ClientError, Result};

/// Mock fact store serving canned facts and recording queries.
#[derive(Default)]
pub struct MockFactStore {
    facts: RwLock<Vec<StoredFact>>,
    queries: RwLock<Vec<FactQuery>>,
    fail_on_query: RwLock<bool>,
}

impl MockFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fact to be returned by every query.
    pub async fn push_fact(&self, fact: StoredFact) {
        self.facts.write().await.push(fact);
    }

    pub async fn set_fail_on_query(&self, fail: bool) {
        *self.fail_on_query.write().await = fail;
    }

    /// Number of queries issued so far.
    pub async fn query_count(&self) -> usize {
        self.queries.read().await.len()
    }

    /// Drain the recorded queries.
    pub async fn take_queries(&self) -> Vec<FactQuery> {
        std::mem::take(&mut *self.queries.write().await)
    }
}

#[async_trait]
impl FactStore for MockFactStore {
    async fn query(&self, filter: &FactQuery) -> Result<Vec<StoredFact>> {
        self.queries.write().await.push(filter.clone());
        if *self.fail_on_query.read().await {
            return Err(ClientError::Config("Mock fact store failure".to_string()));
        }
        Ok(self.facts.read().await.clone())
    }
}

/// Mock directory with in-memory users, teams, and rosters.
#[derive(Default)]
pub struct MockDirectory {
    users: RwLock<HashMap<String, User>>,
    teams_by_user: RwLock<HashMap<Uuid, Vec<Team>>>,
    members_by_team: RwLock<HashMap<Uuid, Vec<User>>>,
    fail_on_lookup: RwLock<bool>,
    lookups: AtomicUsize,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: User) {
        self.users.write().await.insert(user.username.clone(), user);
    }

    pub async fn add_team_for_user(&self, user_id: Uuid, team: Team) {
        self.teams_by_user
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(team);
    }

    pub async fn add_member(&self, team_id: Uuid, user: User) {
        self.members_by_team
            .write()
            .await
            .entry(team_id)
            .or_default()
            .push(user);
    }

    pub async fn set_fail_on_lookup(&self, fail: bool) {
        *self.fail_on_lookup.write().await = fail;
    }

    /// Number of directory calls issued so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    async fn check_fail(&self) -> Result<()> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_lookup.read().await {
            return Err(ClientError::Config("Mock directory failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for MockDirectory {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.check_fail().await?;
        Ok(self.users.read().await.get(username).cloned())
    }

    async fn find_teams_by_user(&self, user_id: Uuid) -> Result<Vec<Team>> {
        self.check_fail().await?;
        Ok(self
            .teams_by_user
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_users_by_team(&self, team_id: Uuid) -> Result<Vec<User>> {
        self.check_fail().await?;
        Ok(self
            .members_by_team
            .read()
            .await
            .get(&team_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fact_store_records_queries() {
        let store = MockFactStore::new();
        store.push_fact(StoredFact::from_value("{}")).await;

        let query = FactQuery::new("BaseFormDroolsEngine");
        let facts = store.query(&query).await.unwrap();

        assert_eq!(facts.len(), 1);
        assert_eq!(store.query_count().await, 1);
        assert_eq!(store.take_queries().await[0], query);
    }

    #[tokio::test]
    async fn test_mock_directory_user_lookup() {
        let directory = MockDirectory::new();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
        };
        directory.add_user(user.clone()).await;

        assert_eq!(
            directory.find_user_by_username("alice").await.unwrap(),
            Some(user)
        );
        assert_eq!(directory.find_user_by_username("bob").await.unwrap(), None);
        assert_eq!(directory.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_directory_injected_failure() {
        let directory = MockDirectory::new();
        directory.set_fail_on_lookup(true).await;

        assert!(directory.find_user_by_username("alice").await.is_err());
    }
}
