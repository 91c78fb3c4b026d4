//! Structured rule conditions evaluated against request attributes.
//!
//! Attribute names may use dotted paths (`"document.status"`) to reach into
//! nested JSON objects. A condition that references a missing attribute is
//! unsatisfied, except under [`Condition::Not`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request-supplied attributes a condition is checked against.
pub type Attributes = serde_json::Map<String, Value>;

/// A boolean predicate attached to a policy rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Attribute is present and equal to `value`.
    Equals { attribute: String, value: Value },
    /// Attribute is present and differs from `value`.
    NotEquals { attribute: String, value: Value },
    /// Attribute is present and equal to one of `values`.
    In { attribute: String, values: Vec<Value> },
    /// Attribute is present (and not null).
    Exists { attribute: String },
    /// Every nested condition holds.
    All { conditions: Vec<Condition> },
    /// At least one nested condition holds.
    AnyOf { conditions: Vec<Condition> },
    /// The nested condition does not hold.
    Not { condition: Box<Condition> },
}

impl Condition {
    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::NotEquals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn one_of<V: Into<Value>>(
        attribute: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(attribute: impl Into<String>) -> Self {
        Self::Exists {
            attribute: attribute.into(),
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::All { conditions }
    }

    pub fn any_of(conditions: Vec<Condition>) -> Self {
        Self::AnyOf { conditions }
    }

    pub fn negate(condition: Condition) -> Self {
        Self::Not {
            condition: Box::new(condition),
        }
    }

    /// Evaluate this condition against the request attributes.
    pub fn evaluate(&self, attributes: &Attributes) -> bool {
        match self {
            Self::Equals { attribute, value } => {
                lookup(attributes, attribute).is_some_and(|v| v == value)
            }
            Self::NotEquals { attribute, value } => {
                lookup(attributes, attribute).is_some_and(|v| v != value)
            }
            Self::In { attribute, values } => {
                lookup(attributes, attribute).is_some_and(|v| values.contains(v))
            }
            Self::Exists { attribute } => lookup(attributes, attribute).is_some(),
            Self::All { conditions } => conditions.iter().all(|c| c.evaluate(attributes)),
            Self::AnyOf { conditions } => conditions.iter().any(|c| c.evaluate(attributes)),
            Self::Not { condition } => !condition.evaluate(attributes),
        }
    }
}

/// True when every condition in the list holds. An empty list always holds.
pub fn all_satisfied(conditions: &[Condition], attributes: &Attributes) -> bool {
    conditions.iter().all(|c| c.evaluate(attributes))
}

fn lookup<'a>(attributes: &'a Attributes, path: &str) -> Option<&'a Value> {
    // Exact keys win over dotted traversal so "a.b" can be a flat key.
    if let Some(value) = attributes.get(path) {
        return non_null(value);
    }

    let mut segments = path.split('.');
    let mut current = attributes.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    non_null(current)
}

fn non_null(value: &Value) -> Option<&Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}
