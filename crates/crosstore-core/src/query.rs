//! The backend-neutral query descriptor.
//!
//! A [`QueryDescriptor`] captures a read/write operation as a small closed
//! algebra: selected columns, a predicate list, ordering, and paging. No SQL
//! or backend-specific syntax ever appears here: each adapter translates
//! the same descriptor into its native filter language.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Predicate algebra
// ---------------------------------------------------------------------------

/// Comparison operators beyond scalar equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `!=`
    Ne,
    /// SQL `LIKE` with `%` and `_` wildcards.
    Like,
}

impl CmpOp {
    /// The SQL spelling of this operator.
    pub fn sql(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Ne => "!=",
            Self::Like => "LIKE",
        }
    }
}

/// A single field predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Scalar equality.
    Eq(Value),
    /// Membership in a value list (`IN`).
    In(Vec<Value>),
    /// `IS NULL`.
    IsNull,
    /// A comparison operator with its right-hand value.
    Cmp { op: CmpOp, value: Value },
}

impl Predicate {
    /// Evaluate this predicate against a candidate field value.
    ///
    /// This is the reference semantics used where a backend has no native
    /// filter language (the Redis variant filters scanned rows in memory
    /// with exactly this function).
    pub fn matches(&self, candidate: &Value) -> bool {
        match self {
            Self::Eq(expected) => loose_eq(candidate, expected),
            Self::In(values) => values.iter().any(|v| loose_eq(candidate, v)),
            Self::IsNull => candidate.is_null(),
            Self::Cmp { op, value } => match op {
                CmpOp::Ne => !loose_eq(candidate, value),
                CmpOp::Like => match (candidate.as_str(), value.as_str()) {
                    (Some(text), Some(pattern)) => like_match(pattern, text),
                    _ => false,
                },
                _ => match compare(candidate, value) {
                    Some(ord) => match op {
                        CmpOp::Gt => ord.is_gt(),
                        CmpOp::Gte => ord.is_ge(),
                        CmpOp::Lt => ord.is_lt(),
                        CmpOp::Lte => ord.is_le(),
                        _ => unreachable!(),
                    },
                    None => false,
                },
            },
        }
    }
}

/// Equality that treats integer and float representations of the same
/// number as equal (JSON `1` vs `1.0`).
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Total order over comparable JSON values; `None` for mixed or
/// non-comparable types.
pub fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    if let (Some(x), Some(y)) = (a.as_bool(), b.as_bool()) {
        return Some(x.cmp(&y));
    }
    None
}

/// Match an SQL `LIKE` pattern (`%` = any run, `_` = any single char).
fn like_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Iterative wildcard matcher with backtracking on the last `%`.
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

// ---------------------------------------------------------------------------
// Ordering and the descriptor
// ---------------------------------------------------------------------------

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ordering {
    pub field: String,
    pub direction: Direction,
}

/// The backend-neutral description of a read/write operation.
///
/// Built by the query builder, consumed once by whichever adapter is
/// active, then discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Selected columns; empty means `*`.
    pub columns: Vec<String>,
    /// Field predicates, in declaration order. Order matters: SQL variants
    /// emit one placeholder per value in exactly this order.
    pub filter: Vec<(String, Predicate)>,
    /// Ordering terms, applied in sequence.
    pub order_by: Vec<Ordering>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryDescriptor {
    /// A descriptor with no columns, predicates, ordering, or paging.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the descriptor has no predicates at all.
    pub fn is_unfiltered(&self) -> bool {
        self.filter.is_empty()
    }

    /// The equality value bound to `field`, if the filter contains one.
    /// Used by the Redis variant to recognize point lookups.
    pub fn eq_value(&self, field: &str) -> Option<&Value> {
        self.filter.iter().find_map(|(name, pred)| match pred {
            Predicate::Eq(value) if name == field => Some(value),
            _ => None,
        })
    }

    /// Evaluate the whole predicate list against a row (logical AND).
    pub fn matches_row(&self, row: &serde_json::Map<String, Value>) -> bool {
        self.filter.iter().all(|(field, pred)| {
            let candidate = row.get(field).unwrap_or(&Value::Null);
            pred.matches(candidate)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_matches_across_number_representations() {
        assert!(Predicate::Eq(json!(1)).matches(&json!(1.0)));
        assert!(!Predicate::Eq(json!(1)).matches(&json!(2)));
        assert!(Predicate::Eq(json!("a")).matches(&json!("a")));
    }

    #[test]
    fn in_and_null_predicates() {
        assert!(Predicate::In(vec![json!(1), json!(2)]).matches(&json!(2)));
        assert!(!Predicate::In(vec![json!(1)]).matches(&json!(3)));
        assert!(Predicate::IsNull.matches(&Value::Null));
        assert!(!Predicate::IsNull.matches(&json!(0)));
    }

    #[test]
    fn comparison_predicates() {
        let gt100 = Predicate::Cmp {
            op: CmpOp::Gt,
            value: json!(100),
        };
        assert!(gt100.matches(&json!(150)));
        assert!(!gt100.matches(&json!(90)));

        let ne = Predicate::Cmp {
            op: CmpOp::Ne,
            value: json!("x"),
        };
        assert!(ne.matches(&json!("y")));
        assert!(!ne.matches(&json!("x")));
    }

    #[test]
    fn like_wildcards() {
        let like = |p: &str, t: &str| {
            Predicate::Cmp {
                op: CmpOp::Like,
                value: json!(p),
            }
            .matches(&json!(t))
        };
        assert!(like("ali%", "alice"));
        assert!(like("%ce", "alice"));
        assert!(like("a_ice", "alice"));
        assert!(like("%li%", "alice"));
        assert!(!like("bob%", "alice"));
        assert!(like("%", ""));
    }

    #[test]
    fn descriptor_matches_row_is_conjunction() {
        let mut descriptor = QueryDescriptor::new();
        descriptor
            .filter
            .push(("active".into(), Predicate::Eq(json!(true))));
        descriptor.filter.push((
            "views".into(),
            Predicate::Cmp {
                op: CmpOp::Gt,
                value: json!(100),
            },
        ));

        let hit = json!({"active": true, "views": 150});
        let miss_views = json!({"active": true, "views": 90});
        let miss_active = json!({"active": false, "views": 150});
        assert!(descriptor.matches_row(hit.as_object().unwrap()));
        assert!(!descriptor.matches_row(miss_views.as_object().unwrap()));
        assert!(!descriptor.matches_row(miss_active.as_object().unwrap()));
    }

    #[test]
    fn missing_field_is_null() {
        let mut descriptor = QueryDescriptor::new();
        descriptor
            .filter
            .push(("deleted_at".into(), Predicate::IsNull));
        let row = json!({"id": 1});
        assert!(descriptor.matches_row(row.as_object().unwrap()));
    }
}
