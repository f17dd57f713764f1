//! Test utilities.
//!
//! Event factories and trivial handlers shared by unit and integration
//! tests. Mock implementations of the service traits live next to their
//! traits (`bus::mock`, `clients::mock`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::bus::{properties, Delivery, Event, EventHandler};
use crate::forms::{FORM_LABEL, RESULT_FACT_TYPE};

/// Handler that counts deliveries.
#[derive(Default)]
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> Arc<AtomicUsize> {
        self.count.clone()
    }
}

impl EventHandler for CountingHandler {
    fn handle(&self, _delivery: Arc<Delivery>) -> BoxFuture<'static, crate::bus::Result<()>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// A minimal event with just a producer identity.
pub fn make_form_event(created_by: &str) -> Event {
    Event {
        created_by: created_by.to_string(),
        ..Default::default()
    }
}

/// A complete frustration survey result event, as produced upstream.
pub fn make_submission_event(created_by: &str, organization: Option<&str>) -> Event {
    let payload = serde_json::json!({
        "tag": FORM_LABEL,
        "submittedBy": created_by,
        "formVariables": {
            format!("{FORM_LABEL} - Absence of trust"): {"q1": 3.0},
        },
    });

    Event {
        payload: payload.to_string(),
        tag: Some(FORM_LABEL.to_string()),
        created_by: created_by.to_string(),
        created_at: Some(Utc::now()),
        organization: organization.map(str::to_string),
        session_id: Some(Uuid::new_v4()),
        unit: None,
        ..Default::default()
    }
    .with_property(properties::FACT_TYPE, RESULT_FACT_TYPE)
}

/// Wrap an event in consumer-side delivery metadata.
pub fn make_delivery(topic: &str, event: Event) -> Arc<Delivery> {
    Arc::new(Delivery {
        event,
        topic: topic.to_string(),
        group_id: None,
        key: None,
        partition: 0,
        offset: 0,
        timestamp: Some(Utc::now()),
    })
}
