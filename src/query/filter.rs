//! Filter expressions and their SQL rendering
//!
//! Field names resolve against the row: `objectId`, `createdAt` and
//! `updatedAt` are columns, anything else is read from the payload with
//! `json_extract`. Every literal is bound as a parameter.

use crate::codec::format_date;
use crate::object::{Object, ObjectKey};
use crate::storage::SqlFragment;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use std::ops::Not;

/// A literal compared against a field
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Date(DateTime<Utc>),
}

impl Literal {
    fn to_sql(&self) -> SqlValue {
        match self {
            Literal::Null => SqlValue::Null,
            // json_extract yields 1/0 for JSON booleans
            Literal::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Literal::Integer(i) => SqlValue::Integer(*i),
            Literal::Real(r) => SqlValue::Real(*r),
            Literal::Text(s) => SqlValue::Text(s.clone()),
            Literal::Date(d) => SqlValue::Text(format_date(d)),
        }
    }

    fn is_date(&self) -> bool {
        matches!(self, Literal::Date(_))
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Text(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Integer(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Literal::Integer(value.into())
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Real(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(value: DateTime<Utc>) -> Self {
        Literal::Date(value)
    }
}

impl<T: Into<Literal>> From<Option<T>> for Literal {
    fn from(value: Option<T>) -> Self {
        value.map_or(Literal::Null, Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn operator(self) -> &'static str {
        match self {
            // IS / IS NOT treat NULL as an ordinary value
            Comparison::Eq => " IS ",
            Comparison::Ne => " IS NOT ",
            Comparison::Lt => " < ",
            Comparison::Le => " <= ",
            Comparison::Gt => " > ",
            Comparison::Ge => " >= ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMatch {
    BeginsWith,
    Contains,
    EndsWith,
}

/// A leaf comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        field: String,
        comparison: Comparison,
        value: Literal,
    },
    Between {
        field: String,
        low: Literal,
        high: Literal,
    },
    In {
        field: String,
        values: Vec<Literal>,
    },
    Null {
        field: String,
        negated: bool,
    },
    Text {
        field: String,
        mode: TextMatch,
        pattern: String,
        case_insensitive: bool,
    },
    PointsTo {
        field: String,
        target: ObjectKey,
    },
    /// A SQL expression passed to the engine as-is
    Raw(SqlFragment),
}

impl Condition {
    fn compare(field: impl Into<String>, comparison: Comparison, value: impl Into<Literal>) -> Self {
        Condition::Compare {
            field: field.into(),
            comparison,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, Comparison::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, Comparison::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, Comparison::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, Comparison::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, Comparison::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, Comparison::Ge, value)
    }

    /// Inclusive range
    pub fn between(field: impl Into<String>, low: impl Into<Literal>, high: impl Into<Literal>) -> Self {
        Condition::Between {
            field: field.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    /// Set membership; an empty set matches nothing
    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Literal>,
    {
        Condition::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// The field is absent or null
    pub fn is_null(field: impl Into<String>) -> Self {
        Condition::Null {
            field: field.into(),
            negated: false,
        }
    }

    pub fn not_null(field: impl Into<String>) -> Self {
        Condition::Null {
            field: field.into(),
            negated: true,
        }
    }

    fn text(field: impl Into<String>, mode: TextMatch, pattern: impl Into<String>) -> Self {
        Condition::Text {
            field: field.into(),
            mode,
            pattern: pattern.into(),
            case_insensitive: false,
        }
    }

    pub fn begins_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::text(field, TextMatch::BeginsWith, prefix)
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::text(field, TextMatch::Contains, needle)
    }

    pub fn ends_with(field: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self::text(field, TextMatch::EndsWith, suffix)
    }

    /// Make a string match ignore case; no effect on other conditions
    pub fn case_insensitive(mut self) -> Self {
        if let Condition::Text { case_insensitive, .. } = &mut self {
            *case_insensitive = true;
        }
        self
    }

    /// The field holds a pointer to `target`
    pub fn points_to(field: impl Into<String>, target: &Object) -> Self {
        Condition::PointsTo {
            field: field.into(),
            target: target.key(),
        }
    }

    /// A SQL expression over the `objects` row, with `?` parameters
    pub fn raw(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Condition::Raw(SqlFragment::new(sql, params))
    }

    pub(crate) fn to_sql(&self) -> SqlFragment {
        let mut out = SqlFragment::default();
        match self {
            Condition::Compare { field, comparison, value } => {
                out.append(&field_expr(field, value.is_date()))
                    .push_sql(comparison.operator())
                    .bind(value.to_sql());
            }
            Condition::Between { field, low, high } => {
                out.append(&field_expr(field, low.is_date()))
                    .push_sql(" BETWEEN ")
                    .bind(low.to_sql())
                    .push_sql(" AND ")
                    .bind(high.to_sql());
            }
            Condition::In { field, values } => {
                if values.is_empty() {
                    out.push_sql("0");
                    return out;
                }
                let date = values.iter().any(Literal::is_date);
                out.append(&field_expr(field, date)).push_sql(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        out.push_sql(", ");
                    }
                    out.bind(value.to_sql());
                }
                out.push_sql(")");
            }
            Condition::Null { field, negated } => {
                out.append(&field_expr(field, false))
                    .push_sql(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Condition::Text {
                field,
                mode,
                pattern,
                case_insensitive,
            } => {
                let (subject, needle) = text_operands(field, pattern, *case_insensitive);
                match mode {
                    TextMatch::BeginsWith => {
                        out.push_sql("substr(")
                            .append(&subject)
                            .push_sql(", 1, length(")
                            .append(&needle)
                            .push_sql(")) = ")
                            .append(&needle);
                    }
                    TextMatch::Contains => {
                        out.push_sql("instr(")
                            .append(&subject)
                            .push_sql(", ")
                            .append(&needle)
                            .push_sql(") > 0");
                    }
                    TextMatch::EndsWith => {
                        out.push_sql("(length(")
                            .append(&subject)
                            .push_sql(") >= length(")
                            .append(&needle)
                            .push_sql(") AND substr(")
                            .append(&subject)
                            .push_sql(", length(")
                            .append(&subject)
                            .push_sql(") - length(")
                            .append(&needle)
                            .push_sql(") + 1) = ")
                            .append(&needle)
                            .push_sql(")");
                    }
                }
            }
            Condition::PointsTo { field, target } => {
                out.append(&payload_expr(field, Some("className")))
                    .push_sql(" = ")
                    .bind(SqlValue::Text(target.class_name.clone()))
                    .push_sql(" AND ")
                    .append(&payload_expr(field, Some("objectId")))
                    .push_sql(" = ")
                    .bind(SqlValue::Text(target.object_id.clone()));
            }
            Condition::Raw(fragment) => {
                out.append(fragment);
            }
        }
        out
    }
}

/// A boolean expression tree over conditions
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Condition(Condition),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn and(self, other: impl Into<Filter>) -> Filter {
        Filter::And(Box::new(self), Box::new(other.into()))
    }

    pub fn or(self, other: impl Into<Filter>) -> Filter {
        Filter::Or(Box::new(self), Box::new(other.into()))
    }

    pub(crate) fn to_sql(&self) -> SqlFragment {
        let mut out = SqlFragment::default();
        match self {
            Filter::Condition(condition) => {
                out.push_sql("(").append(&condition.to_sql()).push_sql(")");
            }
            Filter::And(left, right) => {
                out.append(&left.to_sql()).push_sql(" AND ").append(&right.to_sql());
                wrap(&mut out);
            }
            Filter::Or(left, right) => {
                out.append(&left.to_sql()).push_sql(" OR ").append(&right.to_sql());
                wrap(&mut out);
            }
            Filter::Not(inner) => {
                out.push_sql("NOT ").append(&inner.to_sql());
                wrap(&mut out);
            }
        }
        out
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }
}

impl Not for Condition {
    type Output = Filter;

    fn not(self) -> Filter {
        !Filter::from(self)
    }
}

impl From<Condition> for Filter {
    fn from(condition: Condition) -> Self {
        Filter::Condition(condition)
    }
}

fn wrap(fragment: &mut SqlFragment) {
    fragment.sql = format!("({})", fragment.sql);
}

/// JSON path of a top-level payload field
/// SQL reading a payload field, or one member of a map stored in it.
///
/// Quoted JSON path labels end at the first `"`, so fields containing one
/// are looked up by key with `json_each` instead.
fn payload_expr(field: &str, member: Option<&str>) -> SqlFragment {
    if !field.contains('"') {
        let path = match member {
            Some(member) => format!("$.\"{}\".\"{}\"", field, member),
            None => format!("$.\"{}\"", field),
        };
        return SqlFragment::new("json_extract(payload, ?)", vec![SqlValue::Text(path)]);
    }

    match member {
        Some(member) => SqlFragment::new(
            "(SELECT json_extract(value, ?) FROM json_each(payload) WHERE key = ? AND type = 'object')",
            vec![
                SqlValue::Text(format!("$.\"{}\"", member)),
                SqlValue::Text(field.to_string()),
            ],
        ),
        None => SqlFragment::new(
            "(SELECT value FROM json_each(payload) WHERE key = ?)",
            vec![SqlValue::Text(field.to_string())],
        ),
    }
}

/// SQL expression reading a field; dates are compared by their ISO text
pub(crate) fn field_expr(field: &str, date: bool) -> SqlFragment {
    match field {
        "objectId" => SqlFragment::new("object_id", Vec::new()),
        "createdAt" => SqlFragment::new("created_at", Vec::new()),
        "updatedAt" => SqlFragment::new("updated_at", Vec::new()),
        _ => payload_expr(field, date.then_some("iso")),
    }
}

fn text_operands(field: &str, pattern: &str, case_insensitive: bool) -> (SqlFragment, SqlFragment) {
    let subject = field_expr(field, false);
    let needle = SqlFragment::new("?", vec![SqlValue::Text(pattern.to_string())]);
    if !case_insensitive {
        return (subject, needle);
    }

    let mut lower_subject = SqlFragment::default();
    lower_subject.push_sql("lower(").append(&subject).push_sql(")");
    let mut lower_needle = SqlFragment::default();
    lower_needle.push_sql("lower(").append(&needle).push_sql(")");
    (lower_subject, lower_needle)
}
