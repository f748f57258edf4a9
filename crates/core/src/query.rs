//! Basic graph patterns with `NOT EXISTS` filters.
//!
//! A [`Query`] is a conjunction of positive [`TriplePattern`]s plus any number
//! of negated groups. A solution of the positive part survives only if no
//! negated group can be extended from it, which is the anti-join needed for
//! "drugs with no contraindication the patient has" style questions:
//!
//! ```rust
//! use glycograph::{EntityId, Predicate, Query, Term, TriplePattern, TripleStore, Value};
//!
//! let ns = "http://example.org/onto#";
//! let p = |l: &str| Predicate::new(format!("{ns}{l}"));
//! let e = |l: &str| EntityId::new(format!("{ns}{l}"));
//!
//! let mut store = TripleStore::new();
//! store.add(e("Metformin"), Predicate::rdf_type(), Value::Entity(e("Agent")));
//! store.add(e("Insulin"), Predicate::rdf_type(), Value::Entity(e("Agent")));
//! store.add(e("Insulin"), p("has_Disadvantages"), Value::Entity(e("Hypoglycemia")));
//! store.add(e("Patient1"), p("has_History"), Value::Entity(e("Hypoglycemia")));
//!
//! let drug = Term::var("drug");
//! let query = Query::select(["drug"])
//!     .pattern(TriplePattern::new(drug.clone(), Predicate::rdf_type(), Term::entity(e("Agent"))))
//!     .not_exists([
//!         TriplePattern::new(drug, p("has_Disadvantages"), Term::var("c")),
//!         TriplePattern::new(Term::entity(e("Patient1")), p("has_History"), Term::var("c")),
//!     ]);
//!
//! let rows = query.evaluate(&store).unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows[0]["drug"], Value::Entity(e("Metformin")));
//! ```

use crate::{EntityId, GraphError, Predicate, Result, TripleStore, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Variable bindings of one result row.
pub type Solution = BTreeMap<String, Value>;

/// A subject or object position in a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Var(String),
    Const(Value),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    pub fn entity(id: EntityId) -> Self {
        Term::Const(Value::Entity(id))
    }

    /// The value this term stands for under `binding`, if any.
    fn resolve<'a>(&'a self, binding: &'a Solution) -> Option<&'a Value> {
        match self {
            Term::Var(name) => binding.get(name),
            Term::Const(value) => Some(value),
        }
    }

    fn is_bound(&self, binding: &Solution) -> bool {
        self.resolve(binding).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Term,
    pub predicate: Predicate,
    pub object: Term,
}

impl TriplePattern {
    pub fn new(subject: Term, predicate: Predicate, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    fn variables(&self) -> impl Iterator<Item = &str> {
        [&self.subject, &self.object]
            .into_iter()
            .filter_map(|term| match term {
                Term::Var(name) => Some(name.as_str()),
                Term::Const(_) => None,
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    select: Vec<String>,
    patterns: Vec<TriplePattern>,
    not_exists: Vec<Vec<TriplePattern>>,
}

impl Query {
    /// Start a query projecting the given variables.
    pub fn select<I, S>(variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            select: variables.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a positive pattern.
    pub fn pattern(mut self, pattern: TriplePattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Add a negated group: solutions for which every pattern in the group
    /// can be satisfied together are discarded.
    pub fn not_exists(mut self, group: impl IntoIterator<Item = TriplePattern>) -> Self {
        self.not_exists.push(group.into_iter().collect());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.patterns.is_empty() {
            return Err(GraphError::InvalidQuery(
                "at least one positive pattern is required".into(),
            ));
        }
        let bound: BTreeSet<&str> = self
            .patterns
            .iter()
            .flat_map(TriplePattern::variables)
            .collect();
        if let Some(missing) = self.select.iter().find(|v| !bound.contains(v.as_str())) {
            return Err(GraphError::InvalidQuery(format!(
                "selected variable ?{missing} does not occur in a positive pattern"
            )));
        }
        if self.not_exists.iter().any(Vec::is_empty) {
            return Err(GraphError::InvalidQuery("empty NOT EXISTS group".into()));
        }
        Ok(())
    }

    /// Evaluate against a store. Rows are projected onto the selected
    /// variables, deduplicated and returned in sorted order.
    pub fn evaluate(&self, store: &TripleStore) -> Result<Vec<Solution>> {
        self.validate()?;

        let positive: Vec<&TriplePattern> = self.patterns.iter().collect();
        let mut rows = BTreeSet::new();
        extend(store, &positive, Solution::new(), &mut |solution| {
            let excluded = self.not_exists.iter().any(|group| {
                let group: Vec<&TriplePattern> = group.iter().collect();
                let mut found = false;
                extend(store, &group, solution.clone(), &mut |_| {
                    found = true;
                    false
                });
                found
            });
            if !excluded {
                let row: Solution = self
                    .select
                    .iter()
                    .filter_map(|v| solution.get(v).map(|value| (v.clone(), value.clone())))
                    .collect();
                rows.insert(row);
            }
            true
        });

        tracing::debug!(
            patterns = self.patterns.len(),
            negated_groups = self.not_exists.len(),
            rows = rows.len(),
            "pattern query evaluated"
        );
        Ok(rows.into_iter().collect())
    }
}

/// Enumerate every extension of `binding` satisfying all `patterns`.
///
/// `visit` returns `false` to stop early; the return value reports whether
/// enumeration ran to completion.
fn extend(
    store: &TripleStore,
    patterns: &[&TriplePattern],
    binding: Solution,
    visit: &mut dyn FnMut(Solution) -> bool,
) -> bool {
    // Most constrained pattern first.
    let Some((index, pattern)) = patterns
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| {
            usize::from(p.subject.is_bound(&binding)) + usize::from(p.object.is_bound(&binding))
        })
        .map(|(i, p)| (i, *p))
    else {
        return visit(binding);
    };
    let rest: Vec<&TriplePattern> = patterns
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, p)| *p)
        .collect();

    let subject = match pattern.subject.resolve(&binding) {
        Some(Value::Entity(id)) => Some(id),
        // A literal can never be a subject.
        Some(Value::Literal(_)) => return true,
        None => None,
    };
    let object = pattern.object.resolve(&binding);

    for triple in store.matches(subject, Some(&pattern.predicate), object) {
        let mut next = binding.clone();
        if !bind(&mut next, &pattern.subject, &Value::Entity(triple.subject.clone())) {
            continue;
        }
        if !bind(&mut next, &pattern.object, triple.object) {
            continue;
        }
        if !extend(store, &rest, next, visit) {
            return false;
        }
    }
    true
}

/// Bind `term` to `value`, failing on a conflicting earlier binding.
fn bind(binding: &mut Solution, term: &Term, value: &Value) -> bool {
    match term {
        Term::Const(_) => true,
        Term::Var(name) => match binding.get(name) {
            Some(existing) => existing == value,
            None => {
                binding.insert(name.clone(), value.clone());
                true
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Literal;

    const NS: &str = "http://example.org/onto#";

    fn e(local: &str) -> EntityId {
        EntityId::new(format!("{NS}{local}"))
    }

    fn p(local: &str) -> Predicate {
        Predicate::new(format!("{NS}{local}"))
    }

    fn v(local: &str) -> Value {
        Value::Entity(e(local))
    }

    fn drugs(rows: &[Solution]) -> Vec<String> {
        rows.iter()
            .map(|row| row["drug"].as_entity().unwrap().local_name().to_string())
            .collect()
    }

    fn fixture() -> TripleStore {
        let mut store = TripleStore::new();
        for drug in ["Metformin", "Sulfonylurea", "Insulin"] {
            store.add(e(drug), Predicate::rdf_type(), v("Agent"));
        }
        store.add(e("Sulfonylurea"), p("has_Disadvantages"), v("RenalImpairment"));
        store.add(e("Insulin"), p("has_Disadvantages"), v("Hypoglycemia"));
        store.add(e("Insulin"), p("has_Disadvantages"), v("WeightGain"));
        store
    }

    fn agents() -> TriplePattern {
        TriplePattern::new(
            Term::var("drug"),
            Predicate::rdf_type(),
            Term::entity(e("Agent")),
        )
    }

    fn suitability(patient: &str) -> Query {
        Query::select(["drug"])
            .pattern(agents())
            .not_exists([
                TriplePattern::new(Term::var("drug"), p("has_Disadvantages"), Term::var("c")),
                TriplePattern::new(
                    Term::entity(e(patient)),
                    p("has_History_of_Diseases"),
                    Term::var("c"),
                ),
            ])
            .not_exists([TriplePattern::new(
                Term::entity(e(patient)),
                p("has_Adverse_Drug_Reactions"),
                Term::var("drug"),
            )])
    }

    #[test]
    fn anti_join_excludes_shared_condition_only() {
        let mut store = fixture();
        store.add(e("P1"), p("has_History_of_Diseases"), v("WeightGain"));
        store.add(e("P1"), p("has_History_of_Diseases"), v("Asthma"));

        let rows = suitability("P1").evaluate(&store).unwrap();
        assert_eq!(drugs(&rows), vec!["Metformin", "Sulfonylurea"]);
    }

    #[test]
    fn simple_negation_excludes_adverse_reaction() {
        let mut store = fixture();
        store.add(e("P1"), p("has_Adverse_Drug_Reactions"), v("Metformin"));

        let rows = suitability("P1").evaluate(&store).unwrap();
        assert_eq!(drugs(&rows), vec!["Insulin", "Sulfonylurea"]);
    }

    #[test]
    fn unknown_subject_behaves_as_empty_history() {
        let rows = suitability("Nobody").evaluate(&fixture()).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn joins_share_variables_across_patterns() {
        let mut store = fixture();
        let label = Value::Literal(Literal::lang("Renal impairment", "en"));
        store.add(e("RenalImpairment"), p("label"), label.clone());

        let query = Query::select(["drug", "label"])
            .pattern(TriplePattern::new(Term::var("drug"), p("has_Disadvantages"), Term::var("c")))
            .pattern(TriplePattern::new(Term::var("c"), p("label"), Term::var("label")));
        let rows = query.evaluate(&store).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["drug"], v("Sulfonylurea"));
        assert_eq!(rows[0]["label"], label);
    }

    #[test]
    fn repeated_variable_must_bind_consistently() {
        let mut store = TripleStore::new();
        store.add(e("a"), p("knows"), v("a"));
        store.add(e("a"), p("knows"), v("b"));
        let query = Query::select(["x"]).pattern(TriplePattern::new(
            Term::var("x"),
            p("knows"),
            Term::var("x"),
        ));
        let rows = query.evaluate(&store).unwrap();
        assert_eq!(rows, vec![Solution::from([("x".to_string(), v("a"))])]);
    }

    #[test]
    fn projection_deduplicates_rows() {
        let query = Query::select(["drug"])
            .pattern(TriplePattern::new(Term::var("drug"), p("has_Disadvantages"), Term::var("c")));
        let rows = query.evaluate(&fixture()).unwrap();
        assert_eq!(drugs(&rows), vec!["Insulin", "Sulfonylurea"]);
    }

    #[test]
    fn rejects_malformed_queries() {
        let store = fixture();
        let unbound = Query::select(["nope"]).pattern(agents());
        assert!(matches!(unbound.evaluate(&store), Err(GraphError::InvalidQuery(_))));

        let no_patterns = Query::select(Vec::<String>::new());
        assert!(matches!(no_patterns.evaluate(&store), Err(GraphError::InvalidQuery(_))));

        let empty_group = Query::select(["drug"])
            .pattern(agents())
            .not_exists(Vec::new());
        assert!(matches!(empty_group.evaluate(&store), Err(GraphError::InvalidQuery(_))));
    }
}
