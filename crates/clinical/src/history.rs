//! Patient history as submitted by the relational layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Clinical grouping of a history entry.
///
/// Groups only shape the input; every condition becomes the same
/// `has_History_of_Diseases` edge in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HistoryCategory {
    Cvd,
    RenalGu,
    Others,
    Hypo,
    Weight,
    Bone,
    GiSx,
    Chf,
}

impl HistoryCategory {
    pub const ALL: [HistoryCategory; 8] = [
        HistoryCategory::Cvd,
        HistoryCategory::RenalGu,
        HistoryCategory::Others,
        HistoryCategory::Hypo,
        HistoryCategory::Weight,
        HistoryCategory::Bone,
        HistoryCategory::GiSx,
        HistoryCategory::Chf,
    ];

    /// Key used by the frontend payload.
    pub fn key(self) -> &'static str {
        match self {
            HistoryCategory::Cvd => "cvd",
            HistoryCategory::RenalGu => "renalGu",
            HistoryCategory::Others => "others",
            HistoryCategory::Hypo => "hypo",
            HistoryCategory::Weight => "weight",
            HistoryCategory::Bone => "bone",
            HistoryCategory::GiSx => "giSx",
            HistoryCategory::Chf => "chf",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Like [`from_key`](Self::from_key), but unknown keys fall back to
    /// [`HistoryCategory::Others`].
    pub fn route(key: &str) -> Self {
        Self::from_key(key).unwrap_or_else(|| {
            tracing::warn!(key, "unrecognized history category, filing under others");
            HistoryCategory::Others
        })
    }
}

impl std::fmt::Display for HistoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Complete desired history of one patient: condition labels per category
/// plus the labels of drugs the patient reacted badly to.
///
/// Deserializes from the flat object the frontend posts:
///
/// ```
/// use glycograph_clinical::{HistoryCategory, PatientHistoryView};
///
/// let view: PatientHistoryView = serde_json::from_str(
///     r#"{"renalGu": ["Contraindications CKD"], "hypo": [], "adrs": ["TZDs"]}"#,
/// ).unwrap();
/// assert_eq!(view.labels(HistoryCategory::RenalGu), ["Contraindications CKD"]);
/// assert_eq!(view.adverse_reactions(), ["TZDs"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawHistory", into = "RawHistory")]
pub struct PatientHistoryView {
    conditions: BTreeMap<HistoryCategory, Vec<String>>,
    adverse_reactions: Vec<String>,
}

impl PatientHistoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conditions<I, S>(mut self, category: HistoryCategory, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for label in labels {
            self.push_condition(category, label);
        }
        self
    }

    pub fn with_adverse_reactions<I, S>(mut self, drugs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for drug in drugs {
            self.push_adverse_reaction(drug);
        }
        self
    }

    /// Blank labels are ignored.
    pub fn push_condition(&mut self, category: HistoryCategory, label: impl Into<String>) {
        if let Some(label) = normalize(label.into()) {
            self.conditions.entry(category).or_default().push(label);
        }
    }

    pub fn push_adverse_reaction(&mut self, drug: impl Into<String>) {
        if let Some(drug) = normalize(drug.into()) {
            self.adverse_reactions.push(drug);
        }
    }

    pub fn labels(&self, category: HistoryCategory) -> &[String] {
        self.conditions.get(&category).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every condition, categories in declaration order.
    pub fn conditions(&self) -> impl Iterator<Item = (HistoryCategory, &str)> {
        self.conditions
            .iter()
            .flat_map(|(category, labels)| labels.iter().map(move |l| (*category, l.as_str())))
    }

    pub fn adverse_reactions(&self) -> &[String] {
        &self.adverse_reactions
    }

    pub fn is_empty(&self) -> bool {
        self.adverse_reactions.is_empty() && self.conditions.values().all(Vec::is_empty)
    }
}

fn normalize(label: String) -> Option<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == label.len() {
        Some(label)
    } else {
        Some(trimmed.to_string())
    }
}

/// Wire shape: `{"<category>": [labels...], ..., "adrs": [drugs...]}`.
#[derive(Serialize, Deserialize)]
struct RawHistory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    adrs: Option<Vec<String>>,
    #[serde(flatten)]
    categories: BTreeMap<String, serde_json::Value>,
}

impl From<RawHistory> for PatientHistoryView {
    fn from(raw: RawHistory) -> Self {
        let mut view = PatientHistoryView::new();
        for (key, value) in raw.categories {
            // Scalars and nulls are form noise, not history.
            let serde_json::Value::Array(items) = value else {
                continue;
            };
            let category = HistoryCategory::route(&key);
            for item in items {
                if let serde_json::Value::String(label) = item {
                    view.push_condition(category, label);
                }
            }
        }
        view.with_adverse_reactions(raw.adrs.unwrap_or_default())
    }
}

impl From<PatientHistoryView> for RawHistory {
    fn from(view: PatientHistoryView) -> Self {
        let categories = view
            .conditions
            .into_iter()
            .map(|(category, labels)| (category.key().to_string(), serde_json::json!(labels)))
            .collect();
        RawHistory {
            adrs: Some(view.adverse_reactions),
            categories,
        }
    }
}
