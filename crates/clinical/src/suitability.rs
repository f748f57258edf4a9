//! Which drugs of the treatment class a patient can safely take.
//!
//! A drug is suitable when it belongs to the drug class, none of its
//! disadvantages is in the patient's disease history, and the patient has no
//! recorded adverse reaction to it. The evaluation is a hash-set anti-join:
//!
//! 1. `H` = conditions in the patient's history, `A` = drugs with a recorded
//!    adverse reaction;
//! 2. every member of the drug class is a candidate;
//! 3. drop candidates in `A`;
//! 4. drop candidates with any disadvantage in `H`;
//! 5. the survivors, as display labels, are the answer.

use crate::registry::{display_label, Vocabulary};
use glycograph::{EntityId, Predicate, Query, Term, TriplePattern, TripleStore, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Outcome of a suitability query.
///
/// "No drug fits" is a domain answer, distinct from an engine fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "drugs", rename_all = "snake_case")]
pub enum Suitability {
    /// Display labels of the suitable drugs, sorted. Never empty.
    Suitable(Vec<String>),
    NoneSuitable,
}

impl Suitability {
    fn from_labels(mut labels: Vec<String>) -> Self {
        if labels.is_empty() {
            return Suitability::NoneSuitable;
        }
        // One label per class member; two individuals may share a label.
        labels.sort();
        Suitability::Suitable(labels)
    }

    pub fn drugs(&self) -> &[String] {
        match self {
            Suitability::Suitable(drugs) => drugs,
            Suitability::NoneSuitable => &[],
        }
    }

    pub fn is_none_suitable(&self) -> bool {
        matches!(self, Suitability::NoneSuitable)
    }
}

/// Suitability question for one patient.
#[derive(Debug, Clone)]
pub struct SuitabilityQuery {
    patient: EntityId,
    drug_class: EntityId,
    has_disadvantages: Predicate,
    has_history: Predicate,
    has_adverse_reactions: Predicate,
}

impl SuitabilityQuery {
    pub fn new(vocabulary: &Vocabulary, patient_id: u64) -> Self {
        Self {
            patient: vocabulary.patient_individual(patient_id),
            drug_class: vocabulary.drug_class(),
            has_disadvantages: vocabulary.has_disadvantages(),
            has_history: vocabulary.has_history_of_diseases(),
            has_adverse_reactions: vocabulary.has_adverse_drug_reactions(),
        }
    }

    /// Ask about members of another class instead of the vocabulary's drug
    /// class.
    pub fn drug_class(mut self, class: EntityId) -> Self {
        self.drug_class = class;
        self
    }

    pub fn patient(&self) -> &EntityId {
        &self.patient
    }

    /// Evaluate against one consistent snapshot of the store.
    ///
    /// A patient with no edges (including one never registered) has empty
    /// `H` and `A`, so every class member is returned.
    pub fn evaluate(&self, store: &TripleStore) -> Suitability {
        let history: HashSet<&Value> = store.objects(&self.patient, &self.has_history).collect();
        let reactions: HashSet<&Value> = store
            .objects(&self.patient, &self.has_adverse_reactions)
            .collect();
        let class = Value::Entity(self.drug_class.clone());

        let mut candidates = 0usize;
        let labels: Vec<String> = store
            .subjects(&Predicate::rdf_type(), &class)
            .inspect(|_| candidates += 1)
            .filter(|drug| !reactions.contains(&Value::Entity((*drug).clone())))
            .filter(|drug| {
                !store
                    .objects(drug, &self.has_disadvantages)
                    .any(|condition| history.contains(condition))
            })
            .map(display_label)
            .collect();

        tracing::debug!(
            patient = %self.patient,
            candidates,
            history = history.len(),
            adverse_reactions = reactions.len(),
            suitable = labels.len(),
            "evaluated suitability"
        );
        Suitability::from_labels(labels)
    }

    /// The same question as a general pattern query with two `NOT EXISTS`
    /// groups, selecting `?drug`.
    pub fn to_pattern_query(&self) -> Query {
        let patient = || Term::entity(self.patient.clone());
        Query::select(["drug"])
            .pattern(TriplePattern::new(
                Term::var("drug"),
                Predicate::rdf_type(),
                Term::entity(self.drug_class.clone()),
            ))
            .not_exists([
                TriplePattern::new(
                    Term::var("drug"),
                    self.has_disadvantages.clone(),
                    Term::var("condition"),
                ),
                TriplePattern::new(patient(), self.has_history.clone(), Term::var("condition")),
            ])
            .not_exists([TriplePattern::new(
                patient(),
                self.has_adverse_reactions.clone(),
                Term::var("drug"),
            )])
    }
}
