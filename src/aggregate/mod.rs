//! Composite form aggregation.
//!
//! Reduces a set of stored submissions into one averaged composite form.
//! Pure computation: no I/O, no state across calls.

use std::collections::HashMap;

use serde::Deserialize;

use crate::clients::StoredFact;
use crate::forms::{CompositeForm, ElementRewrite, SubmittedForm};

/// Result type for aggregation.
pub type Result<T> = std::result::Result<T, AggregateError>;

/// Errors that can occur during aggregation.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("Stored fact payload is not a valid submitted form: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// How variables missing from some submissions are averaged.
///
/// A submission may lack a variable key that its siblings carry (partially
/// answered forms, older form revisions). The mean needs a policy for those
/// gaps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Divide every value by the total fact count. A fact missing a
    /// variable implicitly contributes zero, biasing that variable's mean
    /// downward. Reproduces the upstream generator's numbers.
    #[default]
    ZeroFill,

    /// Average each variable over the facts that actually carry it.
    ContributorsOnly,
}

/// Reduce `facts` into `target`, averaging per-question values.
///
/// Each fact's element names are rewritten through `rewrite` before
/// accumulation; the composite never carries an element keyed by the
/// source form's label. After the call, `target.form_variables` holds the
/// union of all rewritten elements/variables seen across `facts`, each
/// mapped to its mean per `policy`.
///
/// An empty `facts` slice is an identity no-op: `target` is returned with
/// its variables untouched and no division takes place.
///
/// A fact whose payload does not parse as a submitted form aborts the
/// whole aggregation; skipping it would silently change every divisor.
pub fn aggregate(
    target: &mut CompositeForm,
    facts: &[StoredFact],
    rewrite: &ElementRewrite,
    policy: AggregationPolicy,
) -> Result<()> {
    if facts.is_empty() {
        return Ok(());
    }

    match policy {
        AggregationPolicy::ZeroFill => zero_fill(target, facts, rewrite),
        AggregationPolicy::ContributorsOnly => contributors_only(target, facts, rewrite),
    }
}

/// Sum `value / fact_count` per variable across all facts.
///
/// Division before summation keeps each increment bounded by the final
/// mean's magnitude, and the result equals the arithmetic mean whenever
/// every fact carries the variable.
fn zero_fill(
    target: &mut CompositeForm,
    facts: &[StoredFact],
    rewrite: &ElementRewrite,
) -> Result<()> {
    let fact_count = facts.len() as f64;

    for fact in facts {
        let form = SubmittedForm::from_json(&fact.value)?;
        for (element, variables) in &form.form_variables {
            let values = target
                .form_variables
                .entry(rewrite.apply(element))
                .or_default();
            for (variable, value) in variables {
                *values.entry(variable.clone()).or_insert(0.0) += value / fact_count;
            }
        }
    }

    Ok(())
}

/// Average each variable over the facts that carry it.
fn contributors_only(
    target: &mut CompositeForm,
    facts: &[StoredFact],
    rewrite: &ElementRewrite,
) -> Result<()> {
    let mut sums: HashMap<String, HashMap<String, (f64, usize)>> = HashMap::new();

    for fact in facts {
        let form = SubmittedForm::from_json(&fact.value)?;
        for (element, variables) in &form.form_variables {
            let entry = sums.entry(rewrite.apply(element)).or_default();
            for (variable, value) in variables {
                let (sum, count) = entry.entry(variable.clone()).or_insert((0.0, 0));
                *sum += value;
                *count += 1;
            }
        }
    }

    for (element, variables) in sums {
        let values = target.form_variables.entry(element).or_default();
        for (variable, (sum, count)) in variables {
            values.insert(variable, sum / count as f64);
        }
    }

    Ok(())
}
