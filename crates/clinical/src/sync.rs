//! Replacing a patient's history edges.

use crate::history::PatientHistoryView;
use crate::registry::{display_label, Vocabulary};
use chrono::{DateTime, Utc};
use glycograph::{EntityId, Transaction, Value};
use serde::Serialize;
use std::collections::BTreeSet;

/// What one synchronization changed, as display labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub patient_id: u64,
    pub patient: EntityId,
    pub removed_history: Vec<String>,
    pub removed_adverse_reactions: Vec<String>,
    pub history: Vec<String>,
    pub adverse_reactions: Vec<String>,
    pub applied_at: DateTime<Utc>,
}

impl SyncReport {
    /// Conditions present after the sync that were not there before.
    pub fn newly_recorded(&self) -> Vec<&str> {
        self.history
            .iter()
            .filter(|label| !self.removed_history.contains(label))
            .map(String::as_str)
            .collect()
    }
}

/// Make `view` the complete history of the patient inside `txn`.
///
/// All previous `has_History_of_Diseases` and `has_Adverse_Drug_Reactions`
/// edges of the patient are removed, then one edge is added per condition
/// (categories in declaration order) and per adverse-reaction drug. Edges of
/// other subjects and predicates are untouched. The patient individual is
/// also typed as a patient if it was not yet.
pub fn apply(
    txn: &mut Transaction<'_>,
    vocabulary: &Vocabulary,
    patient_id: u64,
    view: &PatientHistoryView,
) -> SyncReport {
    let patient = vocabulary.patient_individual(patient_id);
    vocabulary.register_patient(txn, patient_id);

    let history = txn.replace_edges(
        &patient,
        &vocabulary.has_history_of_diseases(),
        view.conditions()
            .map(|(_, label)| Value::Entity(vocabulary.label_individual(label))),
    );
    let reactions = txn.replace_edges(
        &patient,
        &vocabulary.has_adverse_drug_reactions(),
        view.adverse_reactions()
            .iter()
            .map(|drug| Value::Entity(vocabulary.label_individual(drug))),
    );

    tracing::debug!(
        patient = %patient,
        removed = history.removed.len() + reactions.removed.len(),
        added = history.added.len() + reactions.added.len(),
        "replaced history edges"
    );

    SyncReport {
        patient_id,
        patient,
        removed_history: labels(&history.removed),
        removed_adverse_reactions: labels(&reactions.removed),
        history: labels(&history.added),
        adverse_reactions: labels(&reactions.added),
        applied_at: Utc::now(),
    }
}

fn labels(values: &BTreeSet<Value>) -> Vec<String> {
    values
        .iter()
        .map(|value| match value {
            Value::Entity(id) => display_label(id),
            Value::Literal(literal) => literal.lexical.clone(),
        })
        .collect()
}
