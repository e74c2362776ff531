//! Metadata filter predicates evaluated against chunk metadata.
//!
//! A filter is a conjunction of `must` conditions and negated `must_not`
//! conditions. Operators cover exact match (`eq`, `ne`, `in`) and ranges
//! (`gt`, `gte`, `lt`, `lte`). Numbers compare numerically, strings
//! lexicographically (so ISO-8601 timestamps range-compare correctly). An `eq`
//! against an array-valued field matches when any element is equal, which is
//! how tag lists are filtered.
//!
//! The same evaluator backs backend push-down in the memory store and the
//! generic post-filter in retrieval, so both paths agree by construction.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{RagError, Result};
use crate::types::Meta;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<FilterCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<FilterCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOperator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    pub fn with(mut self, field: impl Into<String>, op: FilterOperator, value: impl Into<Value>) -> Self {
        self.must.push(FilterCondition { field: field.into(), op, value: value.into() });
        self
    }

    pub fn without(mut self, field: impl Into<String>, op: FilterOperator, value: impl Into<Value>) -> Self {
        self.must_not.push(FilterCondition { field: field.into(), op, value: value.into() });
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FilterOperator::Eq, value)
    }

    /// Inclusive range `[min, max]` on a field.
    pub fn range(self, field: impl Into<String>, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        let field = field.into();
        self.with(field.clone(), FilterOperator::Gte, min).with(field, FilterOperator::Lte, max)
    }

    /// Reject malformed filters up front (e.g. `in` without an array).
    pub fn validate(&self) -> Result<()> {
        for cond in self.must.iter().chain(self.must_not.iter()) {
            if cond.field.is_empty() {
                return Err(RagError::config("filter condition with empty field name"));
            }
            if cond.op == FilterOperator::In && !cond.value.is_array() {
                return Err(RagError::config(format!("filter on '{}': 'in' expects an array value", cond.field)));
            }
        }
        Ok(())
    }

    pub fn matches(&self, metadata: &Meta) -> bool {
        self.must.iter().all(|c| c.evaluate(metadata)) && !self.must_not.iter().any(|c| c.evaluate(metadata))
    }

    /// Parse `key=value` pairs (CLI syntax) into an equality filter. Values that
    /// parse as JSON scalars are typed, everything else is a string.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut filter = Self::new();
        for pair in pairs {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| RagError::config(format!("filter '{pair}' is not key=value")))?;
            let value = match serde_json::from_str::<Value>(v) {
                Ok(parsed) if !parsed.is_object() && !parsed.is_array() => parsed,
                _ => Value::String(v.to_string()),
            };
            filter = filter.eq(k.trim(), value);
        }
        Ok(filter)
    }
}

impl FilterCondition {
    fn evaluate(&self, metadata: &Meta) -> bool {
        let Some(field_value) = metadata.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOperator::Eq => value_eq(field_value, &self.value),
            FilterOperator::Ne => !value_eq(field_value, &self.value),
            FilterOperator::In => match &self.value {
                Value::Array(options) => options.iter().any(|o| value_eq(field_value, o)),
                _ => false,
            },
            FilterOperator::Gt => value_cmp(field_value, &self.value) == Some(Ordering::Greater),
            FilterOperator::Gte => {
                matches!(value_cmp(field_value, &self.value), Some(Ordering::Greater | Ordering::Equal))
            }
            FilterOperator::Lt => value_cmp(field_value, &self.value) == Some(Ordering::Less),
            FilterOperator::Lte => {
                matches!(value_cmp(field_value, &self.value), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }
}

fn value_eq(field: &Value, expected: &Value) -> bool {
    match (field, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => false,
        },
        (Value::Array(items), e) if !e.is_array() => items.iter().any(|i| value_eq(i, e)),
        (a, b) => a == b,
    }
}

fn value_cmp(field: &Value, bound: &Value) -> Option<Ordering> {
    match (field, bound) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}
