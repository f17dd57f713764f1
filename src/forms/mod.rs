//! Survey form data model.
//!
//! This module contains:
//! - `SubmittedForm`: one respondent's completed questionnaire
//! - `CompositeForm`: an averaged form computed over many submissions
//! - `ElementRewrite`: maps source element names to output element names
//! - Well-known identity constants shared with upstream producers
//!
//! Wire format is JSON with camelCase field names, matching the form
//! engine that produces submissions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of the inbound survey form.
pub const FORM_LABEL: &str = "The 5 Frustrations on Teamworking";

/// Fact type discriminator carried by result events.
pub const RESULT_FACT_TYPE: &str = "DroolsResultForm";

/// Application discriminator for stored facts.
pub const SOURCE_APPLICATION: &str = "BaseFormDroolsEngine";

/// Identity of organization-wide composite forms.
pub const ORGANIZATION_OUTPUT: &str = "FrustrationOnTeamworkingOrganizationOutput";

/// Identity of team-wide composite forms.
pub const TEAM_OUTPUT: &str = "FrustrationOnTeamworkingTeamOutput";

/// Per-element variable values: element name -> variable name -> value.
///
/// Variable names are unique per element. Values are finite; JSON cannot
/// encode NaN or infinities, so deserialized forms always satisfy this.
pub type FormVariables = HashMap<String, HashMap<String, f64>>;

/// One respondent's completed questionnaire instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedForm {
    /// Form identity string.
    pub tag: Option<String>,
    /// User identifier of the respondent.
    pub submitted_by: Option<String>,
    /// Submission timestamp.
    pub submitted_at: Option<DateTime<Utc>>,
    pub organization: Option<String>,
    pub unit: Option<String>,
    /// Numeric answers, keyed by element then variable.
    #[serde(default)]
    pub form_variables: FormVariables,
}

impl SubmittedForm {
    /// Parse a form from its JSON wire representation.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Whether this form carries the expected identity tag.
    pub fn has_tag(&self, expected: &str) -> bool {
        self.tag.as_deref() == Some(expected)
    }
}

/// An aggregate form averaged over N submissions.
///
/// Same shape as [`SubmittedForm`], but its tag carries an output identity
/// ([`ORGANIZATION_OUTPUT`] or [`TEAM_OUTPUT`]) and every value in
/// `form_variables` is a mean across the contributing submissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeForm {
    pub tag: Option<String>,
    /// The user whose submission triggered this aggregation run.
    pub submitted_by: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub organization: Option<String>,
    pub unit: Option<String>,
    #[serde(default)]
    pub form_variables: FormVariables,
}

impl CompositeForm {
    /// Create an empty composite with the given output identity.
    pub fn new(output_tag: impl Into<String>) -> Self {
        Self {
            tag: Some(output_tag.into()),
            ..Default::default()
        }
    }

    /// Set the triggering submitter.
    pub fn with_submitted_by(mut self, submitted_by: impl Into<String>) -> Self {
        self.submitted_by = Some(submitted_by.into());
        self
    }

    /// Set the submission timestamp.
    pub fn with_submitted_at(mut self, submitted_at: Option<DateTime<Utc>>) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    /// Set the organization the composite is scoped to.
    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization;
        self
    }

    /// Serialize to the JSON wire representation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Maps source element names to output element names.
///
/// Element names in stored submissions embed the form label (for example
/// `"The 5 Frustrations on Teamworking - Absence of trust"`); composites
/// replace that label with the output identity so downstream consumers can
/// distinguish aggregate elements from individual answers.
#[derive(Debug, Clone)]
pub struct ElementRewrite {
    from: String,
    to: String,
}

impl ElementRewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Rewrite for organization-wide composites.
    pub fn organization() -> Self {
        Self::new(FORM_LABEL, ORGANIZATION_OUTPUT)
    }

    /// Rewrite for team-wide composites.
    pub fn team() -> Self {
        Self::new(FORM_LABEL, TEAM_OUTPUT)
    }

    /// Apply the rewrite to an element name.
    pub fn apply(&self, element: &str) -> String {
        element.replace(&self.from, &self.to)
    }
}
