//! Frustration survey summary handler.
//!
//! Receives submitted-form events from the bus, recognizes "The 5
//! Frustrations on Teamworking" results, and republishes averaged
//! composites at two granularities:
//!
//! - organization scope: all stored submissions for the organization
//! - team scope: submissions from the submitter's team members
//!
//! The two scopes are failure-isolated: an error in one is logged and
//! does not prevent the other from completing, and `handle` never fails
//! the subscription.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, error, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::{aggregate, AggregateError, AggregationPolicy};
use crate::bus::{properties, BusError, Delivery, Event, EventBus, EventHandler};
use crate::clients::{ClientError, Directory, FactQuery, FactStore};
use crate::forms::{
    CompositeForm, ElementRewrite, SubmittedForm, FORM_LABEL, ORGANIZATION_OUTPUT,
    RESULT_FACT_TYPE, SOURCE_APPLICATION, TEAM_OUTPUT,
};

/// Errors that can abort one aggregation scope.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Publish failed: {0}")]
    Bus(#[from] BusError),

    #[error("Composite codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

type ScopeResult = std::result::Result<(), ScopeError>;

/// Publishes composite forms to the outbound topic.
///
/// An empty topic disables sending: aggregation still runs but the result
/// is dropped.
pub struct ResultPublisher {
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl ResultPublisher {
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    /// Publish one composite, tagged with its output identity.
    async fn send(
        &self,
        composite: &CompositeForm,
        executed_by: &str,
        organization: Option<String>,
        session_id: Option<Uuid>,
        unit: Option<String>,
    ) -> ScopeResult {
        if self.topic.is_empty() {
            debug!(tag = ?composite.tag, "Send topic not configured, dropping composite");
            return Ok(());
        }

        let event = Event {
            payload: composite.to_json()?,
            tag: composite.tag.clone(),
            created_by: executed_by.to_string(),
            created_at: Some(Utc::now()),
            organization,
            session_id,
            unit,
            ..Default::default()
        }
        .with_property(properties::FACT_TYPE, RESULT_FACT_TYPE);

        self.bus.publish(&self.topic, event).await?;

        debug!(tag = ?composite.tag, topic = %self.topic, "Composite published");

        Ok(())
    }
}

/// Event handler producing organization-wide and team-wide survey
/// composites.
///
/// Holds only immutable configuration and shared clients; registered once
/// with the bus at startup and safe to invoke from concurrent delivery
/// tasks.
#[derive(Clone)]
pub struct FrustrationSummaryHandler {
    topic: Arc<str>,
    facts: Arc<dyn FactStore>,
    directory: Arc<dyn Directory>,
    publisher: Arc<ResultPublisher>,
    policy: AggregationPolicy,
}

impl FrustrationSummaryHandler {
    pub fn new(
        topic: impl Into<Arc<str>>,
        facts: Arc<dyn FactStore>,
        directory: Arc<dyn Directory>,
        publisher: Arc<ResultPublisher>,
        policy: AggregationPolicy,
    ) -> Self {
        Self {
            topic: topic.into(),
            facts,
            directory,
            publisher,
            policy,
        }
    }

    /// Whether a delivery is a frustration survey result for us.
    fn is_relevant(&self, delivery: &Delivery) -> bool {
        delivery.topic == *self.topic
            && delivery.event.property(properties::FACT_TYPE) == Some(RESULT_FACT_TYPE)
            && delivery.event.tag.as_deref() == Some(FORM_LABEL)
    }

    /// Parse the in-flight submission, treating anything unexpected as
    /// "not applicable" rather than an error.
    fn parse_submission(event: &Event) -> Option<SubmittedForm> {
        match SubmittedForm::from_json(&event.payload) {
            Ok(form) if form.has_tag(FORM_LABEL) => Some(form),
            Ok(form) => {
                debug!(tag = ?form.tag, "Payload tag does not match, ignoring");
                None
            }
            Err(e) => {
                debug!(error = %e, "Payload is not a form result, ignoring");
                None
            }
        }
    }

    /// Fact filter shared by both scopes.
    fn base_query(&self, organization: Option<String>) -> FactQuery {
        FactQuery::new(SOURCE_APPLICATION)
            .with_organization(organization)
            .latest_by_user()
            .with_group(self.topic.as_ref())
            .with_element_name(FORM_LABEL)
            .with_fact_type(RESULT_FACT_TYPE)
    }

    /// Aggregate across the whole organization and publish the composite.
    async fn organization_scope(&self, event: &Event) -> ScopeResult {
        if Self::parse_submission(event).is_none() {
            return Ok(());
        }

        let organization = event
            .organization
            .clone()
            .or_else(|| event.property(properties::ORGANIZATION).map(str::to_string));

        let mut composite = CompositeForm::new(ORGANIZATION_OUTPUT)
            .with_submitted_by(&event.created_by)
            .with_submitted_at(event.created_at)
            .with_organization(organization.clone());

        let facts = self.facts.query(&self.base_query(organization.clone())).await?;
        aggregate(
            &mut composite,
            &facts,
            &ElementRewrite::organization(),
            self.policy,
        )?;

        self.publisher
            .send(
                &composite,
                &event.created_by,
                organization,
                event.session_id,
                event.unit.clone(),
            )
            .await
    }

    /// Aggregate across the submitter's team and publish the composite.
    ///
    /// A missing user or an empty team list is a normal outcome that
    /// short-circuits this scope only.
    async fn team_scope(&self, event: &Event) -> ScopeResult {
        if Self::parse_submission(event).is_none() {
            return Ok(());
        }

        let Some(user) = self.directory.find_user_by_username(&event.created_by).await? else {
            warn!(username = %event.created_by, "No user with that username, skipping team scope");
            return Ok(());
        };

        let teams = self.directory.find_teams_by_user(user.id).await?;
        // Deterministic choice when the user belongs to several teams:
        // the smallest team id wins, independent of directory ordering.
        let Some(team) = teams.into_iter().min_by_key(|team| team.id) else {
            warn!(username = %user.username, "No teams found for user, skipping team scope");
            return Ok(());
        };

        let members = self.directory.find_users_by_team(team.id).await?;

        let organization = team
            .organization
            .as_ref()
            .map(|org| org.name.clone())
            .or_else(|| event.organization.clone());

        let mut composite = CompositeForm::new(TEAM_OUTPUT)
            .with_submitted_by(&event.created_by)
            .with_submitted_at(event.created_at)
            .with_organization(organization.clone());

        let query = self
            .base_query(organization.clone())
            .with_created_by(members.into_iter().map(|member| member.username).collect());
        let facts = self.facts.query(&query).await?;
        aggregate(&mut composite, &facts, &ElementRewrite::team(), self.policy)?;

        self.publisher
            .send(
                &composite,
                &event.created_by,
                organization,
                event.session_id,
                Some(team.name),
            )
            .await
    }
}

impl EventHandler for FrustrationSummaryHandler {
    fn handle(&self, delivery: Arc<Delivery>) -> BoxFuture<'static, crate::bus::Result<()>> {
        if !self.is_relevant(&delivery) {
            debug!(topic = %delivery.topic, tag = ?delivery.event.tag, "Ignoring event");
            return Box::pin(async { Ok(()) });
        }

        let span = tracing::info_span!(
            "summary.handle",
            created_by = %delivery.event.created_by,
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
        );

        let this = self.clone();

        Box::pin(
            async move {
                debug!(session_id = ?delivery.event.session_id, "Received survey result");

                // Scopes are failure-isolated: neither error reaches the
                // bus, so the subscription stays alive and offsets commit.
                if let Err(e) = this.organization_scope(&delivery.event).await {
                    error!(error = %e, "Organization scope failed");
                }

                if let Err(e) = this.team_scope(&delivery.event).await {
                    error!(error = %e, "Team scope failed");
                }

                Ok(())
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockEventBus;
    use crate::clients::{MockDirectory, MockFactStore, OrganizationRef, StoredFact, Team, User};
    use crate::test_utils::{make_delivery, make_submission_event};

    const TOPIC: &str = "form-results";
    const SEND_TOPIC: &str = "form-composites";

    struct Fixture {
        handler: FrustrationSummaryHandler,
        facts: Arc<MockFactStore>,
        directory: Arc<MockDirectory>,
        outbound: Arc<MockEventBus>,
    }

    fn fixture() -> Fixture {
        fixture_with_send_topic(SEND_TOPIC)
    }

    fn fixture_with_send_topic(send_topic: &str) -> Fixture {
        let facts = Arc::new(MockFactStore::new());
        let directory = Arc::new(MockDirectory::new());
        let outbound = Arc::new(MockEventBus::new());
        let publisher = Arc::new(ResultPublisher::new(outbound.clone(), send_topic));
        let handler = FrustrationSummaryHandler::new(
            TOPIC,
            facts.clone(),
            directory.clone(),
            publisher,
            AggregationPolicy::ZeroFill,
        );
        Fixture {
            handler,
            facts,
            directory,
            outbound,
        }
    }

    async fn seed_team(directory: &MockDirectory, username: &str, team_name: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
        };
        let team = Team {
            id: Uuid::new_v4(),
            name: team_name.to_string(),
            organization: Some(OrganizationRef {
                name: "Acme".to_string(),
            }),
        };
        directory.add_user(user.clone()).await;
        directory.add_team_for_user(user.id, team.clone()).await;
        directory.add_member(team.id, user.clone()).await;
        user
    }

    fn stored_fact(value: f64) -> StoredFact {
        let form = serde_json::json!({
            "tag": FORM_LABEL,
            "formVariables": {
                format!("{FORM_LABEL} - Absence of trust"): {"q1": value},
            },
        });
        StoredFact::from_value(form.to_string())
    }

    #[tokio::test]
    async fn test_ignores_wrong_topic() {
        let f = fixture();
        let delivery = make_delivery("other-topic", make_submission_event("alice", Some("Acme")));

        f.handler.handle(delivery).await.unwrap();

        assert_eq!(f.facts.query_count().await, 0);
        assert_eq!(f.directory.lookup_count(), 0);
        assert_eq!(f.outbound.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_ignores_wrong_fact_type() {
        let f = fixture();
        let mut event = make_submission_event("alice", Some("Acme"));
        event
            .properties
            .insert(properties::FACT_TYPE.to_string(), "SomethingElse".to_string());

        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        assert_eq!(f.facts.query_count().await, 0);
        assert_eq!(f.directory.lookup_count(), 0);
        assert_eq!(f.outbound.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_ignores_wrong_tag() {
        let f = fixture();
        let mut event = make_submission_event("alice", Some("Acme"));
        event.tag = Some("Some other form".to_string());

        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        assert_eq!(f.facts.query_count().await, 0);
        assert_eq!(f.outbound.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_payload_tag_mismatch_produces_nothing() {
        let f = fixture();
        seed_team(&f.directory, "alice", "Platform").await;
        let mut event = make_submission_event("alice", Some("Acme"));
        // Envelope tag matches but payload carries another form.
        event.payload = serde_json::json!({"tag": "Other form"}).to_string();

        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        assert_eq!(f.facts.query_count().await, 0);
        assert_eq!(f.outbound.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_unparseable_payload_produces_nothing() {
        let f = fixture();
        let mut event = make_submission_event("alice", Some("Acme"));
        event.payload = "not json".to_string();

        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        assert_eq!(f.facts.query_count().await, 0);
        assert_eq!(f.outbound.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_publishes_both_scopes() {
        let f = fixture();
        seed_team(&f.directory, "alice", "Platform").await;
        f.facts.push_fact(stored_fact(2.0)).await;
        f.facts.push_fact(stored_fact(4.0)).await;

        let event = make_submission_event("alice", Some("Acme"));
        let session_id = event.session_id;
        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        let published = f.outbound.take_published().await;
        assert_eq!(published.len(), 2);

        let (org_events, team_events): (Vec<_>, Vec<_>) = published
            .iter()
            .partition(|(_, e)| e.tag.as_deref() == Some(ORGANIZATION_OUTPUT));
        assert_eq!(org_events.len(), 1);
        assert_eq!(team_events.len(), 1);

        for (topic, event) in &published {
            assert_eq!(topic, SEND_TOPIC);
            assert_eq!(event.created_by, "alice");
            assert_eq!(event.session_id, session_id);
            assert_eq!(event.organization.as_deref(), Some("Acme"));

            let composite: CompositeForm = serde_json::from_str(&event.payload).unwrap();
            for (element, vars) in &composite.form_variables {
                assert!(!element.contains(FORM_LABEL));
                assert!((vars["q1"] - 3.0).abs() < 1e-9);
            }
        }

        // Team composite routes to the team as its unit.
        assert_eq!(team_events[0].1.unit.as_deref(), Some("Platform"));
    }

    #[tokio::test]
    async fn test_team_query_restricted_to_members() {
        let f = fixture();
        let user = seed_team(&f.directory, "alice", "Platform").await;
        f.directory
            .add_member(
                f.directory.find_teams_by_user(user.id).await.unwrap()[0].id,
                User {
                    id: Uuid::new_v4(),
                    username: "bob".to_string(),
                },
            )
            .await;

        let event = make_submission_event("alice", Some("Acme"));
        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        let queries = f.facts.take_queries().await;
        assert_eq!(queries.len(), 2);

        // Organization query is unrestricted; team query carries the roster.
        let org_query = queries.iter().find(|q| q.created_by.is_empty()).unwrap();
        let team_query = queries.iter().find(|q| !q.created_by.is_empty()).unwrap();
        assert_eq!(org_query.organization.as_deref(), Some("Acme"));
        assert!(team_query.created_by.contains(&"alice".to_string()));
        assert!(team_query.created_by.contains(&"bob".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_user_still_publishes_organization_scope() {
        let f = fixture();
        // No directory entries at all.
        let event = make_submission_event("ghost", Some("Acme"));

        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        let published = f.outbound.take_published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1.tag.as_deref(), Some(ORGANIZATION_OUTPUT));
    }

    #[tokio::test]
    async fn test_user_without_teams_still_publishes_organization_scope() {
        let f = fixture();
        f.directory
            .add_user(User {
                id: Uuid::new_v4(),
                username: "alice".to_string(),
            })
            .await;

        let event = make_submission_event("alice", Some("Acme"));
        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        let published = f.outbound.take_published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1.tag.as_deref(), Some(ORGANIZATION_OUTPUT));
    }

    #[tokio::test]
    async fn test_fact_store_failure_isolated_per_scope() {
        let f = fixture();
        seed_team(&f.directory, "alice", "Platform").await;
        f.facts.set_fail_on_query(true).await;

        let event = make_submission_event("alice", Some("Acme"));
        // Neither scope may leak its failure to the bus.
        let result = f.handler.handle(make_delivery(TOPIC, event)).await;

        assert!(result.is_ok());
        assert_eq!(f.outbound.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_directory_failure_does_not_block_organization_scope() {
        let f = fixture();
        f.directory.set_fail_on_lookup(true).await;

        let event = make_submission_event("alice", Some("Acme"));
        let result = f.handler.handle(make_delivery(TOPIC, event)).await;

        assert!(result.is_ok());
        let published = f.outbound.take_published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1.tag.as_deref(), Some(ORGANIZATION_OUTPUT));
    }

    #[tokio::test]
    async fn test_publish_failure_not_observable_by_bus() {
        let f = fixture();
        seed_team(&f.directory, "alice", "Platform").await;
        f.outbound.set_fail_on_publish(true).await;

        let event = make_submission_event("alice", Some("Acme"));
        let result = f.handler.handle(make_delivery(TOPIC, event)).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_empty_send_topic_drops_composites() {
        let f = fixture_with_send_topic("");
        seed_team(&f.directory, "alice", "Platform").await;

        let event = make_submission_event("alice", Some("Acme"));
        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        // Aggregation ran (facts were queried) but nothing was sent.
        assert_eq!(f.facts.query_count().await, 2);
        assert_eq!(f.outbound.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_organization_falls_back_to_custom_property() {
        let f = fixture();
        let mut event = make_submission_event("alice", None);
        event.properties.insert(
            properties::ORGANIZATION.to_string(),
            "Fallback Org".to_string(),
        );

        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        let published = f.outbound.take_published().await;
        assert_eq!(published[0].1.organization.as_deref(), Some("Fallback Org"));
    }

    #[tokio::test]
    async fn test_smallest_team_id_wins() {
        let f = fixture();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
        };
        f.directory.add_user(user.clone()).await;

        let low = Team {
            id: Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap(),
            name: "First".to_string(),
            organization: None,
        };
        let high = Team {
            id: Uuid::parse_str("ffffffff-ffff-ffff-ffff-ffffffffffff").unwrap(),
            name: "Last".to_string(),
            organization: None,
        };
        // Inserted high-first to prove ordering does not matter.
        f.directory.add_team_for_user(user.id, high).await;
        f.directory.add_team_for_user(user.id, low.clone()).await;
        f.directory.add_member(low.id, user.clone()).await;

        let event = make_submission_event("alice", Some("Acme"));
        f.handler.handle(make_delivery(TOPIC, event)).await.unwrap();

        let published = f.outbound.take_published().await;
        let team_event = published
            .iter()
            .find(|(_, e)| e.tag.as_deref() == Some(TEAM_OUTPUT))
            .unwrap();
        assert_eq!(team_event.1.unit.as_deref(), Some("First"));
    }
}
