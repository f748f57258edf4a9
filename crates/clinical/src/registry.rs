//! Mapping between domain entities and graph identifiers.
//!
//! Patients are named `Patient<id>`; conditions and drugs are named from
//! their clinical label with spaces turned into underscores. Characters that
//! would make that mapping ambiguous or produce an invalid IRI are
//! percent-encoded, so every label maps to exactly one identifier and back.

use glycograph::{EntityId, Predicate, Transaction, Value};

/// Namespace of the diabetes treatment ontology.
pub const DIABETES_NS: &str = "http://www.semanticweb.org/admin/ontologies/2025/3/diabetes#";

/// Class holding every glucose-lowering drug individual.
pub const DRUG_CLASS: &str = "Glucose-Lowering_Agents";

/// Class of registered patients.
pub const PATIENT_CLASS: &str = "Patients";

pub const HAS_DISADVANTAGES: &str = "has_Disadvantages";
pub const HAS_HISTORY_OF_DISEASES: &str = "has_History_of_Diseases";
pub const HAS_ADVERSE_DRUG_REACTIONS: &str = "has_Adverse_Drug_Reactions";

/// Names individuals, classes and predicates within one ontology namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    namespace: String,
    drug_class: String,
    patient_class: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            namespace: DIABETES_NS.to_string(),
            drug_class: DRUG_CLASS.to_string(),
            patient_class: PATIENT_CLASS.to_string(),
        }
    }
}

impl Vocabulary {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Override the class whose members are candidate drugs.
    pub fn with_drug_class(mut self, local_name: impl Into<String>) -> Self {
        self.drug_class = local_name.into();
        self
    }

    pub fn with_patient_class(mut self, local_name: impl Into<String>) -> Self {
        self.patient_class = local_name.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn term(&self, local_name: &str) -> String {
        format!("{}{local_name}", self.namespace)
    }

    pub fn patient_individual(&self, patient_id: u64) -> EntityId {
        EntityId::new(self.term(&format!("Patient{patient_id}")))
    }

    pub fn label_individual(&self, label: &str) -> EntityId {
        EntityId::new(self.term(&encode_label(label)))
    }

    /// Resolve either a full IRI or a local name within the namespace.
    pub fn resolve(&self, name: &str) -> EntityId {
        if name.contains("://") || name.starts_with("urn:") || name.starts_with("_:") {
            EntityId::new(name)
        } else {
            EntityId::new(self.term(name))
        }
    }

    pub fn drug_class(&self) -> EntityId {
        EntityId::new(self.term(&self.drug_class))
    }

    pub fn patient_class(&self) -> EntityId {
        EntityId::new(self.term(&self.patient_class))
    }

    pub fn has_disadvantages(&self) -> Predicate {
        Predicate::new(self.term(HAS_DISADVANTAGES))
    }

    pub fn has_history_of_diseases(&self) -> Predicate {
        Predicate::new(self.term(HAS_HISTORY_OF_DISEASES))
    }

    pub fn has_adverse_drug_reactions(&self) -> Predicate {
        Predicate::new(self.term(HAS_ADVERSE_DRUG_REACTIONS))
    }

    /// Assert that the patient is a member of the patient class.
    /// Returns `false` if it already was.
    pub fn register_patient(&self, txn: &mut Transaction<'_>, patient_id: u64) -> bool {
        txn.add_individual(&self.patient_individual(patient_id), &self.patient_class())
    }

    pub fn is_registered(&self, store: &glycograph::TripleStore, patient_id: u64) -> bool {
        store.contains(
            &self.patient_individual(patient_id),
            &Predicate::rdf_type(),
            &Value::Entity(self.patient_class()),
        )
    }
}

/// Presentation label of an individual: its local name with underscores
/// shown as spaces.
pub fn display_label(id: &EntityId) -> String {
    decode_label(id.local_name())
}

fn needs_escape(ch: char) -> bool {
    matches!(
        ch,
        '_' | '%' | '#' | '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\'
    ) || ch.is_control()
}

/// Label → local name. Spaces become `_`; see [`needs_escape`] for the
/// characters that are percent-encoded instead.
pub fn encode_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch == ' ' {
            out.push('_');
        } else if needs_escape(ch) {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Inverse of [`encode_label`]. Malformed escapes are kept verbatim.
pub fn decode_label(local_name: &str) -> String {
    let bytes = local_name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'%' if i + 2 < bytes.len() && hex_pair(bytes[i + 1], bytes[i + 2]).is_some() => {
                out.extend(hex_pair(bytes[i + 1], bytes[i + 2]));
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    u8::try_from(hi * 16 + lo).ok()
}
