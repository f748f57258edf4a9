//! Glycograph — embedded triple store for small, durable ontologies.
//!
//! The core primitive is a [`Triple`]: a subject-predicate-object fact with
//! set semantics. Facts live in an in-memory [`TripleStore`] indexed by
//! predicate in both directions, and the whole set is mirrored to a durable
//! N-Triples snapshot after every committed [`Transaction`].
//!
//! [`OntologyGraph`] owns the store, the single-writer lock and the storage
//! backend. Readers see either the state before a transaction or the state
//! after it, never a partial edge set.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use glycograph::{EntityId, OntologyGraph, Predicate, Value};
//!
//! let graph = OntologyGraph::open("diabetes.nt").unwrap();
//!
//! let drug = EntityId::new("http://example.org/onto#Metformin");
//! let class = EntityId::new("http://example.org/onto#GlucoseLoweringAgent");
//!
//! // Mutations happen inside a transaction that is saved on commit.
//! graph
//!     .transact(|txn| {
//!         txn.add_individual(&drug, &class);
//!         Ok::<_, glycograph::GraphError>(())
//!     })
//!     .unwrap();
//!
//! // Reads run against a consistent snapshot.
//! let typed = graph
//!     .read(|store| store.contains(&drug, &Predicate::rdf_type(), &Value::Entity(class.clone())))
//!     .unwrap();
//! assert!(typed);
//! ```

pub mod ntriples;
pub mod query;
pub mod storage;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

pub use query::{Query, Solution, Term, TriplePattern};
pub use storage::{FileStorage, MemoryStorage, Storage};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The durable snapshot is not well-formed. `line` is 1-based.
    #[error("corrupt ontology at line {line}: {reason}")]
    CorruptOntology { line: usize, reason: String },
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Identifier of an individual or class.
///
/// Holds either an absolute IRI or a blank-node label written `_:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(iri: impl Into<String>) -> Self {
        Self(iri.into())
    }

    /// A blank node with the given label (without the `_:` prefix).
    pub fn blank(label: &str) -> Self {
        Self(format!("_:{label}"))
    }

    pub fn is_blank(&self) -> bool {
        self.0.starts_with("_:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The fragment after the last `#`, or the whole identifier if there is
    /// none.
    pub fn local_name(&self) -> &str {
        let cut = self.0.rfind('#').map_or(0, |i| i + 1);
        &self.0[cut..]
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A relationship IRI (e.g. `rdf:type`, `has_Disadvantages`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Predicate(pub String);

impl Predicate {
    pub fn new(iri: impl Into<String>) -> Self {
        Self(iri.into())
    }

    /// Class membership.
    pub fn rdf_type() -> Self {
        Self(RDF_TYPE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a literal's lexical form is qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "tag")]
pub enum LiteralKind {
    Plain,
    /// Language-tagged string, e.g. `"Metformin"@en`.
    Language(String),
    /// Typed literal carrying its datatype IRI.
    Typed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    pub lexical: String,
    pub kind: LiteralKind,
}

impl Literal {
    pub fn plain(lexical: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            kind: LiteralKind::Plain,
        }
    }

    pub fn lang(lexical: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            kind: LiteralKind::Language(tag.into()),
        }
    }

    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            kind: LiteralKind::Typed(datatype.into()),
        }
    }
}

/// The value stored in a triple's object position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// A reference to another individual or class.
    Entity(EntityId),
    /// A literal value.
    Literal(Literal),
}

impl Value {
    pub fn as_entity(&self) -> Option<&EntityId> {
        match self {
            Value::Entity(id) => Some(id),
            Value::Literal(_) => None,
        }
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Entity(id)
    }
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        Value::Literal(lit)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Entity(id) => write!(f, "{id}"),
            Value::Literal(lit) => write!(f, "{}", lit.lexical),
        }
    }
}

/// An owned subject-predicate-object fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: EntityId,
    pub predicate: Predicate,
    pub object: Value,
}

impl Triple {
    pub fn new(subject: EntityId, predicate: Predicate, object: impl Into<Value>) -> Self {
        Self {
            subject,
            predicate,
            object: object.into(),
        }
    }
}

/// A triple borrowed from a [`TripleStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TripleRef<'a> {
    pub subject: &'a EntityId,
    pub predicate: &'a Predicate,
    pub object: &'a Value,
}

impl TripleRef<'_> {
    pub fn to_triple(&self) -> Triple {
        Triple {
            subject: self.subject.clone(),
            predicate: self.predicate.clone(),
            object: self.object.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Triple store
// ---------------------------------------------------------------------------

type Adjacency = HashMap<EntityId, HashSet<Value>>;
type ReverseAdjacency = HashMap<Value, HashSet<EntityId>>;

/// In-memory triple set with per-predicate adjacency in both directions.
///
/// Empty inner maps are pruned on removal, so two stores holding the same
/// facts compare equal regardless of their mutation history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripleStore {
    forward: HashMap<Predicate, Adjacency>,
    backward: HashMap<Predicate, ReverseAdjacency>,
    len: usize,
}

impl TripleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a fact. Returns `false` if it was already present.
    pub fn add(&mut self, subject: EntityId, predicate: Predicate, object: Value) -> bool {
        let inserted = self
            .forward
            .entry(predicate.clone())
            .or_default()
            .entry(subject.clone())
            .or_default()
            .insert(object.clone());
        if inserted {
            self.backward
                .entry(predicate)
                .or_default()
                .entry(object)
                .or_default()
                .insert(subject);
            self.len += 1;
        }
        inserted
    }

    pub fn insert(&mut self, triple: Triple) -> bool {
        self.add(triple.subject, triple.predicate, triple.object)
    }

    /// Delete a fact. Absent facts are a no-op and return `false`.
    pub fn remove(&mut self, subject: &EntityId, predicate: &Predicate, object: &Value) -> bool {
        let Some(by_subject) = self.forward.get_mut(predicate) else {
            return false;
        };
        let Some(objects) = by_subject.get_mut(subject) else {
            return false;
        };
        if !objects.remove(object) {
            return false;
        }
        if objects.is_empty() {
            by_subject.remove(subject);
        }
        if by_subject.is_empty() {
            self.forward.remove(predicate);
        }
        self.unlink_backward(subject, predicate, object);
        self.len -= 1;
        true
    }

    /// Delete every fact with this exact subject and predicate and return
    /// the removed objects.
    pub fn remove_all(&mut self, subject: &EntityId, predicate: &Predicate) -> BTreeSet<Value> {
        let Some(by_subject) = self.forward.get_mut(predicate) else {
            return BTreeSet::new();
        };
        let Some(objects) = by_subject.remove(subject) else {
            return BTreeSet::new();
        };
        if by_subject.is_empty() {
            self.forward.remove(predicate);
        }
        for object in &objects {
            self.unlink_backward(subject, predicate, object);
        }
        self.len -= objects.len();
        objects.into_iter().collect()
    }

    fn unlink_backward(&mut self, subject: &EntityId, predicate: &Predicate, object: &Value) {
        if let Some(by_object) = self.backward.get_mut(predicate) {
            if let Some(subjects) = by_object.get_mut(object) {
                subjects.remove(subject);
                if subjects.is_empty() {
                    by_object.remove(object);
                }
            }
            if by_object.is_empty() {
                self.backward.remove(predicate);
            }
        }
    }

    pub fn contains(&self, subject: &EntityId, predicate: &Predicate, object: &Value) -> bool {
        self.forward
            .get(predicate)
            .and_then(|by_subject| by_subject.get(subject))
            .is_some_and(|objects| objects.contains(object))
    }

    /// Objects of `(subject, predicate, *)`.
    pub fn objects<'a>(
        &'a self,
        subject: &EntityId,
        predicate: &Predicate,
    ) -> impl Iterator<Item = &'a Value> + 'a {
        self.forward
            .get(predicate)
            .and_then(|by_subject| by_subject.get(subject))
            .into_iter()
            .flatten()
    }

    /// Subjects of `(*, predicate, object)`.
    pub fn subjects<'a>(
        &'a self,
        predicate: &Predicate,
        object: &Value,
    ) -> impl Iterator<Item = &'a EntityId> + 'a {
        self.backward
            .get(predicate)
            .and_then(|by_object| by_object.get(object))
            .into_iter()
            .flatten()
    }

    /// Scan facts matching the given filters. `None` matches anything.
    ///
    /// The iterator is lazy and can be re-created at will; its order is
    /// stable as long as the store is not mutated.
    pub fn matches<'a>(
        &'a self,
        subject: Option<&'a EntityId>,
        predicate: Option<&'a Predicate>,
        object: Option<&'a Value>,
    ) -> impl Iterator<Item = TripleRef<'a>> + 'a {
        let by_predicate: Box<dyn Iterator<Item = (&'a Predicate, &'a Adjacency)> + 'a> =
            match predicate {
                Some(p) => Box::new(self.forward.get_key_value(p).into_iter()),
                None => Box::new(self.forward.iter()),
            };
        by_predicate
            .flat_map(move |(p, by_subject)| self.scan_predicate(p, by_subject, subject, object))
    }

    pub fn iter(&self) -> impl Iterator<Item = TripleRef<'_>> + '_ {
        self.matches(None, None, None)
    }

    fn scan_predicate<'a>(
        &'a self,
        predicate: &'a Predicate,
        by_subject: &'a Adjacency,
        subject: Option<&'a EntityId>,
        object: Option<&'a Value>,
    ) -> Box<dyn Iterator<Item = TripleRef<'a>> + 'a> {
        match (subject, object) {
            (Some(s), Some(o)) => {
                let hit = by_subject.get_key_value(s).and_then(|(s, objects)| {
                    objects.get(o).map(|o| TripleRef {
                        subject: s,
                        predicate,
                        object: o,
                    })
                });
                Box::new(hit.into_iter())
            }
            (Some(s), None) => Box::new(by_subject.get_key_value(s).into_iter().flat_map(
                move |(s, objects)| {
                    objects.iter().map(move |o| TripleRef {
                        subject: s,
                        predicate,
                        object: o,
                    })
                },
            )),
            (None, Some(o)) => {
                let hit = self
                    .backward
                    .get(predicate)
                    .and_then(|by_object| by_object.get_key_value(o));
                Box::new(hit.into_iter().flat_map(move |(o, subjects)| {
                    subjects.iter().map(move |s| TripleRef {
                        subject: s,
                        predicate,
                        object: o,
                    })
                }))
            }
            (None, None) => Box::new(by_subject.iter().flat_map(move |(s, objects)| {
                objects.iter().map(move |o| TripleRef {
                    subject: s,
                    predicate,
                    object: o,
                })
            })),
        }
    }
}

impl FromIterator<Triple> for TripleStore {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        let mut store = TripleStore::new();
        for triple in iter {
            store.insert(triple);
        }
        store
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Change {
    Added(Triple),
    Removed(Triple),
}

/// Objects removed and added by [`Transaction::replace_edges`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EdgeDelta {
    pub removed: BTreeSet<Value>,
    pub added: BTreeSet<Value>,
}

/// A journaled mutation scope over the store.
///
/// Obtained from [`OntologyGraph::transact`]. Every effective change is
/// journaled so the transaction can be undone if it fails or cannot be
/// saved.
pub struct Transaction<'g> {
    store: &'g mut TripleStore,
    journal: Vec<Change>,
}

impl<'g> Transaction<'g> {
    /// Read access to the store as mutated so far.
    pub fn store(&self) -> &TripleStore {
        self.store
    }

    pub fn add(&mut self, subject: EntityId, predicate: Predicate, object: Value) -> bool {
        let triple = Triple::new(subject, predicate, object);
        let inserted = self.store.insert(triple.clone());
        if inserted {
            self.journal.push(Change::Added(triple));
        }
        inserted
    }

    pub fn remove(&mut self, subject: &EntityId, predicate: &Predicate, object: &Value) -> bool {
        let removed = self.store.remove(subject, predicate, object);
        if removed {
            self.journal.push(Change::Removed(Triple::new(
                subject.clone(),
                predicate.clone(),
                object.clone(),
            )));
        }
        removed
    }

    pub fn remove_all(&mut self, subject: &EntityId, predicate: &Predicate) -> BTreeSet<Value> {
        let removed = self.store.remove_all(subject, predicate);
        self.journal.extend(removed.iter().map(|object| {
            Change::Removed(Triple::new(subject.clone(), predicate.clone(), object.clone()))
        }));
        removed
    }

    /// Assert `(individual, rdf:type, class)`.
    pub fn add_individual(&mut self, individual: &EntityId, class: &EntityId) -> bool {
        self.add(
            individual.clone(),
            Predicate::rdf_type(),
            Value::Entity(class.clone()),
        )
    }

    /// Replace every `(subject, predicate, *)` edge with the given objects.
    pub fn replace_edges(
        &mut self,
        subject: &EntityId,
        predicate: &Predicate,
        objects: impl IntoIterator<Item = Value>,
    ) -> EdgeDelta {
        let removed = self.remove_all(subject, predicate);
        let mut added = BTreeSet::new();
        for object in objects {
            self.add(subject.clone(), predicate.clone(), object.clone());
            added.insert(object);
        }
        EdgeDelta { removed, added }
    }

    /// Number of effective changes recorded so far.
    pub fn change_count(&self) -> usize {
        self.journal.len()
    }
}

fn rollback(store: &mut TripleStore, journal: Vec<Change>) {
    for change in journal.into_iter().rev() {
        match change {
            Change::Added(t) => {
                store.remove(&t.subject, &t.predicate, &t.object);
            }
            Change::Removed(t) => {
                store.insert(t);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Ontology graph
// ---------------------------------------------------------------------------

/// The single logical graph of a process: store, writer lock and storage.
///
/// Share it between request handlers behind an `Arc`.
///
/// # Example
///
/// ```rust,no_run
/// use glycograph::{EntityId, OntologyGraph, Predicate};
///
/// let graph = OntologyGraph::open("diabetes.nt").unwrap();
/// let patient = EntityId::new("http://example.org/onto#Patient7");
/// let history = Predicate::new("http://example.org/onto#has_History_of_Diseases");
/// let count = graph.read(|store| store.objects(&patient, &history).count()).unwrap();
/// println!("{count} conditions");
/// ```
pub struct OntologyGraph {
    store: RwLock<TripleStore>,
    storage: Box<dyn Storage>,
}

impl OntologyGraph {
    /// Load the graph from an N-Triples file.
    ///
    /// Fails with [`GraphError::CorruptOntology`] if the file is malformed;
    /// no partially loaded graph is ever returned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_storage(Box::new(FileStorage::new(path.as_ref())))
    }

    /// Create an empty graph without file I/O. Data is lost on drop.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_storage(Box::new(MemoryStorage::new()))
    }

    pub fn with_storage(storage: Box<dyn Storage>) -> Result<Self> {
        let store = storage.load()?;
        tracing::debug!(
            triples = store.len(),
            storage = %storage.describe(),
            "ontology graph loaded"
        );
        Ok(Self {
            store: RwLock::new(store),
            storage,
        })
    }

    /// Run `f` against a consistent snapshot under the read lock.
    pub fn read<T>(&self, f: impl FnOnce(&TripleStore) -> T) -> Result<T> {
        let store = self
            .store
            .read()
            .map_err(|_| GraphError::Internal("graph lock poisoned".into()))?;
        Ok(f(&store))
    }

    /// Clone of the current triple set.
    pub fn snapshot(&self) -> Result<TripleStore> {
        self.read(TripleStore::clone)
    }

    pub fn len(&self) -> Result<usize> {
        self.read(TripleStore::len)
    }

    /// Run a mutating transaction under the writer lock.
    ///
    /// If `f` succeeds and changed anything, the whole graph is saved
    /// before the lock is released. If `f` fails or the save fails, the
    /// journal is replayed backwards so memory matches the last durable
    /// snapshot, and the error is returned. Nothing is retried.
    pub fn transact<T, E>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<GraphError>,
    {
        let mut store = self
            .store
            .write()
            .map_err(|_| GraphError::Internal("graph lock poisoned".into()))?;

        let mut txn = Transaction {
            store: &mut *store,
            journal: Vec::new(),
        };
        let outcome = f(&mut txn);
        let Transaction { journal, .. } = txn;

        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                if !journal.is_empty() {
                    tracing::warn!(changes = journal.len(), "transaction aborted, rolling back");
                }
                rollback(&mut *store, journal);
                return Err(e);
            }
        };

        if journal.is_empty() {
            return Ok(value);
        }

        if let Err(e) = self.storage.save(&store) {
            tracing::warn!(
                changes = journal.len(),
                error = %e,
                "save failed, rolling back in-memory changes"
            );
            rollback(&mut *store, journal);
            return Err(e.into());
        }

        tracing::info!(
            changes = journal.len(),
            triples = store.len(),
            "transaction committed"
        );
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
