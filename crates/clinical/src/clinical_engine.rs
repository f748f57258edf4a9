//! Clinical layer of Glycograph: patients, their history, and which
//! glucose-lowering drugs they can take.
//!
//! [`ClinicalEngine`] wraps one [`OntologyGraph`] holding the diabetes
//! treatment ontology. The relational side of the backend calls it on
//! patient lifecycle events:
//!
//! ```rust,no_run
//! use glycograph_clinical::{
//!     ClinicalEngine, HistoryCategory, PatientHistoryView, Suitability, Vocabulary,
//! };
//!
//! let engine = ClinicalEngine::open("./diabetes.nt", Vocabulary::default()).unwrap();
//!
//! // A new patient row was created.
//! engine.register_patient(17).unwrap();
//!
//! // The patient's history form was saved.
//! let view = PatientHistoryView::new()
//!     .with_conditions(HistoryCategory::RenalGu, ["Contraindications CKD"])
//!     .with_adverse_reactions(["TZDs"]);
//! engine.sync_history(17, &view).unwrap();
//!
//! match engine.suitable_drugs(17).unwrap() {
//!     Suitability::Suitable(drugs) => println!("suitable: {drugs:?}"),
//!     Suitability::NoneSuitable => println!("no suitable drug"),
//! }
//! ```

pub mod history;
pub mod registry;
pub mod suitability;
pub mod sync;

use glycograph::{EntityId, GraphError, OntologyGraph, Predicate, Triple, Value};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

pub use history::{HistoryCategory, PatientHistoryView};
pub use registry::{display_label, Vocabulary, DIABETES_NS, DRUG_CLASS};
pub use suitability::{Suitability, SuitabilityQuery};
pub use sync::SyncReport;

#[derive(Debug, thiserror::Error)]
pub enum ClinicalError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("unknown patient: {0}")]
    UnknownPatient(u64),
}

pub type Result<T> = std::result::Result<T, ClinicalError>;

/// The relational layer's view of which patients exist.
///
/// Without one, a patient exists once it has been registered in the graph.
pub trait PatientDirectory: Send + Sync {
    fn contains(&self, patient_id: u64) -> bool;
}

impl PatientDirectory for HashSet<u64> {
    fn contains(&self, patient_id: u64) -> bool {
        HashSet::contains(self, &patient_id)
    }
}

impl PatientDirectory for BTreeSet<u64> {
    fn contains(&self, patient_id: u64) -> bool {
        BTreeSet::contains(self, &patient_id)
    }
}

/// Current graph state of one patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientProfile {
    pub patient_id: u64,
    pub registered: bool,
    /// Display labels, sorted.
    pub history: Vec<String>,
    pub adverse_reactions: Vec<String>,
}

pub struct ClinicalEngine {
    graph: OntologyGraph,
    vocabulary: Vocabulary,
    directory: Option<Box<dyn PatientDirectory>>,
}

impl ClinicalEngine {
    /// Load the ontology file at `path`.
    pub fn open(path: impl AsRef<Path>, vocabulary: Vocabulary) -> Result<Self> {
        Ok(Self::with_graph(OntologyGraph::open(path)?, vocabulary))
    }

    pub fn with_graph(graph: OntologyGraph, vocabulary: Vocabulary) -> Self {
        Self {
            graph,
            vocabulary,
            directory: None,
        }
    }

    /// Check patient existence against `directory` instead of graph
    /// registration.
    pub fn with_directory(mut self, directory: impl PatientDirectory + 'static) -> Self {
        self.directory = Some(Box::new(directory));
        self
    }

    pub fn graph(&self) -> &OntologyGraph {
        &self.graph
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Add `(Patient<id>, type, Patients)`. Returns `false` if the patient
    /// was already registered, in which case nothing is written.
    pub fn register_patient(&self, patient_id: u64) -> Result<bool> {
        let created = self.graph.transact(|txn| {
            Ok::<_, ClinicalError>(self.vocabulary.register_patient(txn, patient_id))
        })?;
        if created {
            tracing::info!(patient_id, "registered patient");
        }
        Ok(created)
    }

    pub fn is_registered(&self, patient_id: u64) -> Result<bool> {
        Ok(self
            .graph
            .read(|store| self.vocabulary.is_registered(store, patient_id))?)
    }

    /// Replace the patient's history and adverse-reaction edges with `view`
    /// and save, all under the writer lock.
    ///
    /// Fails with [`ClinicalError::UnknownPatient`] before touching the
    /// graph if the patient does not exist. If the save fails, memory is
    /// rolled back to the last durable state and the error is returned.
    pub fn sync_history(&self, patient_id: u64, view: &PatientHistoryView) -> Result<SyncReport> {
        let report = self.graph.transact(|txn| {
            let known = match &self.directory {
                Some(directory) => directory.contains(patient_id),
                None => self.vocabulary.is_registered(txn.store(), patient_id),
            };
            if !known {
                return Err(ClinicalError::UnknownPatient(patient_id));
            }
            Ok(sync::apply(txn, &self.vocabulary, patient_id, view))
        })?;
        tracing::info!(
            patient_id,
            history = report.history.len(),
            adverse_reactions = report.adverse_reactions.len(),
            "synchronized patient history"
        );
        Ok(report)
    }

    /// Drugs of the vocabulary's drug class the patient can take.
    ///
    /// An unregistered patient gets every drug of the class.
    pub fn suitable_drugs(&self, patient_id: u64) -> Result<Suitability> {
        let query = SuitabilityQuery::new(&self.vocabulary, patient_id);
        Ok(self.graph.read(|store| query.evaluate(store))?)
    }

    pub fn patient_profile(&self, patient_id: u64) -> Result<PatientProfile> {
        let patient = self.vocabulary.patient_individual(patient_id);
        let labels_of = |store: &glycograph::TripleStore, predicate: &Predicate| {
            let mut labels: Vec<String> = store
                .objects(&patient, predicate)
                .filter_map(Value::as_entity)
                .map(display_label)
                .collect();
            labels.sort();
            labels
        };
        Ok(self.graph.read(|store| PatientProfile {
            patient_id,
            registered: self.vocabulary.is_registered(store, patient_id),
            history: labels_of(store, &self.vocabulary.has_history_of_diseases()),
            adverse_reactions: labels_of(store, &self.vocabulary.has_adverse_drug_reactions()),
        })?)
    }

    /// Assert a drug of the drug class together with its disadvantages.
    /// Existing disadvantages of the drug are kept.
    pub fn add_drug<I, S>(&self, label: &str, disadvantages: I) -> Result<EntityId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let drug = self.vocabulary.label_individual(label);
        let changes = self.graph.transact(|txn| {
            txn.add_individual(&drug, &self.vocabulary.drug_class());
            for condition in disadvantages {
                txn.add(
                    drug.clone(),
                    self.vocabulary.has_disadvantages(),
                    Value::Entity(self.vocabulary.label_individual(condition.as_ref())),
                );
            }
            Ok::<_, ClinicalError>(txn.change_count())
        })?;
        tracing::info!(drug = %drug, changes, "added drug");
        Ok(drug)
    }

    /// Every fact whose subject is `name` (a full IRI or a local name in the
    /// vocabulary's namespace).
    pub fn facts_about(&self, name: &str) -> Result<Vec<Triple>> {
        let subject = self.vocabulary.resolve(name);
        Ok(self.graph.read(|store| {
            store
                .matches(Some(&subject), None, None)
                .map(|t| t.to_triple())
                .collect()
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glycograph::{MemoryStorage, Storage, TripleStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn engine() -> ClinicalEngine {
        ClinicalEngine::with_graph(OntologyGraph::open_in_memory().unwrap(), Vocabulary::default())
    }

    fn with_drugs(engine: &ClinicalEngine) {
        engine.add_drug("Metformin", Vec::<&str>::new()).unwrap();
        engine.add_drug("Sulfonylurea", ["Renal Impairment"]).unwrap();
    }

    #[test]
    fn metformin_and_sulfonylurea_scenarios() {
        let engine = engine();
        with_drugs(&engine);
        for id in 1..=3 {
            engine.register_patient(id).unwrap();
        }

        let renal = PatientHistoryView::new()
            .with_conditions(HistoryCategory::RenalGu, ["Renal Impairment"]);
        engine.sync_history(1, &renal).unwrap();
        assert_eq!(
            engine.suitable_drugs(1).unwrap(),
            Suitability::Suitable(vec!["Metformin".into()])
        );

        let reaction = PatientHistoryView::new().with_adverse_reactions(["Metformin"]);
        engine.sync_history(2, &reaction).unwrap();
        assert_eq!(
            engine.suitable_drugs(2).unwrap(),
            Suitability::Suitable(vec!["Sulfonylurea".into()])
        );

        let both = renal.with_adverse_reactions(["Metformin"]);
        engine.sync_history(3, &both).unwrap();
        assert_eq!(engine.suitable_drugs(3).unwrap(), Suitability::NoneSuitable);
    }

    #[test]
    fn unregistered_patient_gets_the_whole_class() {
        let engine = engine();
        with_drugs(&engine);
        assert_eq!(
            engine.suitable_drugs(999).unwrap().drugs(),
            ["Metformin", "Sulfonylurea"]
        );
    }

    #[test]
    fn sync_for_unknown_patient_is_rejected_without_mutation() {
        let engine = engine();
        let before = engine.graph().snapshot().unwrap();
        let view =
            PatientHistoryView::new().with_conditions(HistoryCategory::Hypo, ["Hypoglycemia"]);
        let err = engine.sync_history(8, &view).unwrap_err();
        assert!(matches!(err, ClinicalError::UnknownPatient(8)));
        assert_eq!(engine.graph().snapshot().unwrap(), before);
    }

    #[test]
    fn external_directory_decides_existence() {
        let engine = engine().with_directory(HashSet::from([4u64]));
        let view =
            PatientHistoryView::new().with_conditions(HistoryCategory::Bone, ["Bone fractures"]);
        engine.sync_history(4, &view).unwrap();
        assert!(matches!(
            engine.sync_history(5, &view),
            Err(ClinicalError::UnknownPatient(5))
        ));
        // Syncing a directory patient also types it in the graph.
        assert!(engine.is_registered(4).unwrap());
    }

    #[test]
    fn register_is_idempotent() {
        let engine = engine();
        assert!(engine.register_patient(3).unwrap());
        let len = engine.graph().len().unwrap();
        assert!(!engine.register_patient(3).unwrap());
        assert_eq!(engine.graph().len().unwrap(), len);
    }

    #[test]
    fn profile_reflects_latest_sync() {
        let engine = engine();
        engine.register_patient(6).unwrap();
        let view = PatientHistoryView::new()
            .with_conditions(HistoryCategory::Chf, ["Heart failure", "Edema"])
            .with_adverse_reactions(["TZDs"]);
        engine.sync_history(6, &view).unwrap();

        let profile = engine.patient_profile(6).unwrap();
        assert!(profile.registered);
        assert_eq!(profile.history, ["Edema", "Heart failure"]);
        assert_eq!(profile.adverse_reactions, ["TZDs"]);

        let unknown = engine.patient_profile(7).unwrap();
        assert!(!unknown.registered);
        assert!(unknown.history.is_empty());
    }

    #[test]
    fn facts_about_resolves_local_names() {
        let engine = engine();
        with_drugs(&engine);
        let facts = engine.facts_about("Sulfonylurea").unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts
            .iter()
            .all(|t| t.subject == engine.vocabulary().label_individual("Sulfonylurea")));
    }

    #[test]
    fn relative_namespace_is_refused_and_file_stays_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diabetes.nt");
        std::fs::write(&path, "").unwrap();

        let engine = ClinicalEngine::open(&path, Vocabulary::new("diabetes#")).unwrap();
        assert!(matches!(
            engine.register_patient(1),
            Err(ClinicalError::Graph(GraphError::Persistence(_)))
        ));
        assert!(!engine.is_registered(1).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        let reopened = ClinicalEngine::open(&path, Vocabulary::default()).unwrap();
        assert!(reopened.register_patient(1).unwrap());
    }

    /// Storage that can be told to fail its next saves.
    struct FailingSaves {
        inner: MemoryStorage,
        fail: Arc<AtomicBool>,
    }

    impl Storage for FailingSaves {
        fn load(&self) -> glycograph::Result<TripleStore> {
            self.inner.load()
        }

        fn save(&self, store: &TripleStore) -> glycograph::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(GraphError::Persistence("disk full".into()));
            }
            self.inner.save(store)
        }

        fn describe(&self) -> String {
            "failing".into()
        }
    }

    #[test]
    fn failed_save_keeps_previous_history() {
        let fail = Arc::new(AtomicBool::new(false));
        let storage = FailingSaves {
            inner: MemoryStorage::new(),
            fail: Arc::clone(&fail),
        };
        let graph = OntologyGraph::with_storage(Box::new(storage)).unwrap();
        let engine = ClinicalEngine::with_graph(graph, Vocabulary::default());
        with_drugs(&engine);
        engine.register_patient(1).unwrap();
        let renal = PatientHistoryView::new()
            .with_conditions(HistoryCategory::RenalGu, ["Renal Impairment"]);
        engine.sync_history(1, &renal).unwrap();
        let before = engine.graph().snapshot().unwrap();

        fail.store(true, Ordering::SeqCst);
        let hypo =
            PatientHistoryView::new().with_conditions(HistoryCategory::Hypo, ["Hypoglycemia"]);
        let err = engine.sync_history(1, &hypo).unwrap_err();
        assert!(matches!(err, ClinicalError::Graph(GraphError::Persistence(_))));

        assert_eq!(engine.graph().snapshot().unwrap(), before);
        assert_eq!(
            engine.suitable_drugs(1).unwrap(),
            Suitability::Suitable(vec!["Metformin".into()])
        );
    }
}
