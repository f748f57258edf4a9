use glycograph::{EntityId, Value};
use glycograph_clinical::{
    ClinicalEngine, ClinicalError, HistoryCategory, PatientHistoryView, Suitability, Vocabulary,
    DIABETES_NS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const ONTOLOGY: &str = include_str!("fixtures/diabetes.nt");

const ALL_DRUGS: [&str; 7] = [
    "Biguanides (MET)",
    "DPP-4",
    "GLP-1",
    "Insulins",
    "SGLT2",
    "Sulfonylureas (SU)",
    "TZDs",
];

fn ontology_copy() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("diabetes.nt");
    std::fs::write(&path, ONTOLOGY).unwrap();
    (dir, path)
}

fn open(path: &Path) -> ClinicalEngine {
    ClinicalEngine::open(path, Vocabulary::default()).unwrap()
}

#[test]
fn unregistered_patient_may_take_every_agent() {
    let (_dir, path) = ontology_copy();
    let engine = open(&path);
    assert_eq!(engine.suitable_drugs(404).unwrap().drugs(), ALL_DRUGS);
}

#[test]
fn history_excludes_drugs_with_shared_disadvantages() {
    let (_dir, path) = ontology_copy();
    let engine = open(&path);
    engine.register_patient(2).unwrap();

    let view = PatientHistoryView::new()
        .with_conditions(HistoryCategory::RenalGu, ["Contraindications CKD"])
        .with_conditions(HistoryCategory::Hypo, ["Hypoglycemia"]);
    engine.sync_history(2, &view).unwrap();

    assert_eq!(
        engine.suitable_drugs(2).unwrap().drugs(),
        ["DPP-4", "GLP-1", "SGLT2", "TZDs"]
    );
}

#[test]
fn labels_with_slashes_and_colons_match_the_ontology() {
    let (_dir, path) = ontology_copy();
    let engine = open(&path);
    engine.register_patient(3).unwrap();

    let view = PatientHistoryView::new()
        .with_conditions(HistoryCategory::Cvd, ["Volume depletion/hypotension/dizziness"])
        .with_conditions(HistoryCategory::RenalGu, ["Lactic acidosis risk:rare"]);
    engine.sync_history(3, &view).unwrap();

    let drugs = engine.suitable_drugs(3).unwrap();
    assert!(!drugs.drugs().iter().any(|d| d == "SGLT2"));
    assert!(!drugs.drugs().iter().any(|d| d == "Biguanides (MET)"));
    assert_eq!(drugs.drugs().len(), 5);

    let vocab = engine.vocabulary();
    let edge = Value::Entity(EntityId::new(format!(
        "{DIABETES_NS}Volume_depletion/hypotension/dizziness"
    )));
    let patient = vocab.patient_individual(3);
    let history = vocab.has_history_of_diseases();
    assert!(engine
        .graph()
        .read(|store| store.contains(&patient, &history, &edge))
        .unwrap());
}

#[test]
fn everything_excluded_is_reported_as_none_suitable() {
    let (_dir, path) = ontology_copy();
    let engine = open(&path);
    engine.register_patient(4).unwrap();

    let view: PatientHistoryView = serde_json::from_value(serde_json::json!({
        "weight": ["Weight gain"],
        "giSx": ["Gastrointestinal", "Acute pancreatitis"],
        "adrs": ["SGLT2"]
    }))
    .unwrap();
    engine.sync_history(4, &view).unwrap();

    assert_eq!(engine.suitable_drugs(4).unwrap(), Suitability::NoneSuitable);
}

#[test]
fn synchronized_history_survives_restart() {
    let (_dir, path) = ontology_copy();
    {
        let engine = open(&path);
        engine.register_patient(5).unwrap();
        let view = PatientHistoryView::new()
            .with_conditions(HistoryCategory::Chf, ["Heart failure"])
            .with_adverse_reactions(["Insulins"]);
        engine.sync_history(5, &view).unwrap();
    }

    let engine = open(&path);
    let profile = engine.patient_profile(5).unwrap();
    assert!(profile.registered);
    assert_eq!(profile.history, ["Heart failure"]);
    assert_eq!(profile.adverse_reactions, ["Insulins"]);
    assert_eq!(
        engine.suitable_drugs(5).unwrap().drugs(),
        ["Biguanides (MET)", "DPP-4", "GLP-1", "SGLT2", "Sulfonylureas (SU)"]
    );
}

#[test]
fn resync_replaces_previous_history() {
    let (_dir, path) = ontology_copy();
    let engine = open(&path);

    // Patient1 ships with a history in the fixture.
    let before = engine.patient_profile(1).unwrap();
    assert_eq!(before.history, ["Ml"]);

    let view = PatientHistoryView::new().with_conditions(HistoryCategory::Bone, ["Bone fractures"]);
    let report = engine.sync_history(1, &view).unwrap();
    assert_eq!(report.removed_history, ["Ml"]);

    let after = open(&path).patient_profile(1).unwrap();
    assert_eq!(after.history, ["Bone fractures"]);
}

#[test]
fn unknown_patient_sync_leaves_file_untouched() {
    let (_dir, path) = ontology_copy();
    let engine = open(&path);
    let view = PatientHistoryView::new().with_conditions(HistoryCategory::Hypo, ["Hypoglycemia"]);

    let err = engine.sync_history(77, &view).unwrap_err();
    assert!(matches!(err, ClinicalError::UnknownPatient(77)));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), ONTOLOGY);
}

#[test]
fn added_drug_becomes_a_candidate() {
    let (_dir, path) = ontology_copy();
    let engine = open(&path);
    engine
        .add_drug("Alpha-glucosidase inhibitors", ["Gastrointestinal"])
        .unwrap();

    let reopened = open(&path);
    let all = reopened.suitable_drugs(9).unwrap();
    assert_eq!(all.drugs().len(), ALL_DRUGS.len() + 1);

    reopened.register_patient(9).unwrap();
    let view =
        PatientHistoryView::new().with_conditions(HistoryCategory::GiSx, ["Gastrointestinal"]);
    reopened.sync_history(9, &view).unwrap();
    let drugs = reopened.suitable_drugs(9).unwrap();
    assert!(!drugs.drugs().iter().any(|d| d == "Alpha-glucosidase inhibitors"));
}

#[test]
fn concurrent_syncs_leave_a_consistent_file() {
    let (_dir, path) = ontology_copy();
    let engine = Arc::new(open(&path));
    for id in 10..16 {
        engine.register_patient(id).unwrap();
    }

    let handles: Vec<_> = (10..16u64)
        .map(|id| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for round in 0..5 {
                    let label = if round % 2 == 0 { "Edema" } else { "Polyuria" };
                    let view = PatientHistoryView::new()
                        .with_conditions(HistoryCategory::Others, [label, "Injectable"]);
                    engine.sync_history(id, &view).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Round 4 was the last for every patient.
    let reopened = open(&path);
    for id in 10..16 {
        let profile = reopened.patient_profile(id).unwrap();
        assert_eq!(profile.history, ["Edema", "Injectable"], "patient {id}");
    }
    assert_eq!(
        reopened.graph().snapshot().unwrap(),
        engine.graph().snapshot().unwrap()
    );
}
