//! Composable predicates and their lowering to parameterized SQL.
//!
//! A [`Condition`] is an immutable tree. Lowering walks it left to right,
//! pushing each bound value onto one argument list, so the placeholder
//! numbers in the emitted text always run `start, start + 1, ...` in the
//! same order as the arguments. Composite nodes never reset or reuse a
//! number; siblings see the index their left neighbour stopped at.
//!
//! IN lists are checked when they are lowered, whatever built them: a NULL
//! or a mix of value kinds fails with a validation error instead of
//! producing SQL. An equality against NULL lowers to `IS NULL`.

use keel_core::{Dialect, Error, Result, Value, ValidationErrorKind};
use serde::{Deserialize, Serialize};
use std::ops::Not;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// Equal (=)
    Eq,
    /// Not equal (!=)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
}

impl CompareOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

/// One predicate node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// `column op value`
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    /// `column IN (v1, v2, ...)`
    In { column: String, values: Vec<Value> },
    /// `column BETWEEN low AND high`
    Between {
        column: String,
        low: Value,
        high: Value,
    },
    /// `column IS NULL` / `column IS NOT NULL`
    Null { column: String, negated: bool },
    /// `column LIKE pattern`, the pattern already carrying its wildcards
    Like { column: String, pattern: String },
    /// Conjunction of the children
    And(Vec<Condition>),
    /// Disjunction of the children
    Or(Vec<Condition>),
    /// Negation of the child
    Not(Box<Condition>),
}

/// SQL text produced by lowering, plus its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Lowered {
    pub sql: String,
    /// Arguments in placeholder order.
    pub args: Vec<Value>,
    /// First placeholder index not consumed by this fragment.
    pub next_index: usize,
}

impl Condition {
    fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Condition::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    /// Set membership over untyped values.
    ///
    /// Every value must be non-null and of one kind. Mixed kinds are
    /// rejected instead of being coerced.
    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Result<Self> {
        let column = column.into();
        check_in_list(&column, &values)?;
        Ok(Condition::In { column, values })
    }

    pub fn between(
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Condition::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Condition::Null {
            column: column.into(),
            negated: false,
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Condition::Null {
            column: column.into(),
            negated: true,
        }
    }

    /// Pattern match with a caller-supplied pattern.
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Condition::Like {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    /// `column LIKE '%text%'`
    pub fn contains(column: impl Into<String>, text: &str) -> Self {
        Self::like(column, format!("%{}%", text))
    }

    /// `column LIKE 'text%'`
    pub fn starts_with(column: impl Into<String>, text: &str) -> Self {
        Self::like(column, format!("{}%", text))
    }

    /// `column LIKE '%text'`
    pub fn ends_with(column: impl Into<String>, text: &str) -> Self {
        Self::like(column, format!("%{}", text))
    }

    /// Conjunction of every condition in `conditions`.
    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(conditions.into_iter().collect())
    }

    /// Disjunction of every condition in `conditions`.
    pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(conditions.into_iter().collect())
    }

    /// Combine with AND, extending an existing conjunction in place.
    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut children) => {
                children.push(other);
                Condition::And(children)
            }
            this => Condition::And(vec![this, other]),
        }
    }

    /// Combine with OR, extending an existing disjunction in place.
    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Or(mut children) => {
                children.push(other);
                Condition::Or(children)
            }
            this => Condition::Or(vec![this, other]),
        }
    }

    /// Number of placeholders this condition consumes when lowered.
    pub fn placeholder_count(&self) -> usize {
        match self {
            Condition::Compare { op, value, .. } if null_test(*op, value).is_some() => 0,
            Condition::Compare { .. } | Condition::Like { .. } => 1,
            Condition::In { values, .. } => values.len(),
            Condition::Between { .. } => 2,
            Condition::Null { .. } => 0,
            Condition::And(children) | Condition::Or(children) => {
                children.iter().map(Condition::placeholder_count).sum()
            }
            Condition::Not(child) => child.placeholder_count(),
        }
    }

    /// Lower with `$n` placeholders, the first one numbered `start_index`.
    pub fn lower(&self, start_index: usize) -> Result<Lowered> {
        self.lower_with(Dialect::Postgres, start_index)
    }

    /// Lower for `dialect`, the first placeholder numbered `start_index`.
    ///
    /// Placeholders are numbered from 1, so a `start_index` of 0 is rejected.
    pub fn lower_with(&self, dialect: Dialect, start_index: usize) -> Result<Lowered> {
        if start_index == 0 {
            return Err(Error::validation(
                ValidationErrorKind::Placeholder,
                "start_index",
                "placeholder numbering starts at 1",
            ));
        }
        let mut args = Vec::new();
        let sql = self.build(dialect, &mut args, start_index - 1)?;
        let next_index = start_index + args.len();
        Ok(Lowered {
            sql,
            args,
            next_index,
        })
    }

    /// Append this condition's SQL; placeholder `n` is `offset + n`.
    pub(crate) fn build(
        &self,
        dialect: Dialect,
        params: &mut Vec<Value>,
        offset: usize,
    ) -> Result<String> {
        let sql = match self {
            Condition::Compare { column, op, value } => match null_test(*op, value) {
                Some(test) => format!("{} {}", column, test),
                None => {
                    let placeholder = bind(dialect, params, offset, value.clone());
                    format!("{} {} {}", column, op.as_str(), placeholder)
                }
            },

            Condition::In { column, values } => {
                check_in_list(column, values)?;
                if values.is_empty() {
                    return Ok("FALSE".to_string());
                }
                let placeholders: Vec<_> = values
                    .iter()
                    .map(|v| bind(dialect, params, offset, v.clone()))
                    .collect();
                format!("{} IN ({})", column, placeholders.join(", "))
            }

            Condition::Between { column, low, high } => {
                let low = bind(dialect, params, offset, low.clone());
                let high = bind(dialect, params, offset, high.clone());
                format!("{} BETWEEN {} AND {}", column, low, high)
            }

            Condition::Null { column, negated } => {
                if *negated {
                    format!("{} IS NOT NULL", column)
                } else {
                    format!("{} IS NULL", column)
                }
            }

            Condition::Like { column, pattern } => {
                let placeholder = bind(dialect, params, offset, Value::Text(pattern.clone()));
                format!("{} LIKE {}", column, placeholder)
            }

            Condition::And(children) if children.is_empty() => "TRUE".to_string(),
            Condition::Or(children) if children.is_empty() => "FALSE".to_string(),

            Condition::And(children) => join(dialect, params, offset, children, " AND ")?,
            Condition::Or(children) => join(dialect, params, offset, children, " OR ")?,

            Condition::Not(child) => {
                format!("NOT ({})", child.build(dialect, params, offset)?)
            }
        };
        Ok(sql)
    }
}

/// Reject IN lists holding NULL or more than one kind of value.
fn check_in_list(column: &str, values: &[Value]) -> Result<()> {
    if let Some(null_at) = values.iter().position(Value::is_null) {
        return Err(Error::validation(
            ValidationErrorKind::MixedTypes,
            column,
            format!("IN list holds NULL at position {}", null_at),
        ));
    }
    if let Some(first) = values.first() {
        if let Some(odd) = values.iter().find(|v| !v.same_kind(first)) {
            tracing::debug!(
                column,
                expected = first.type_name(),
                found = odd.type_name(),
                "Rejecting heterogeneous IN list"
            );
            return Err(Error::validation(
                ValidationErrorKind::MixedTypes,
                column,
                format!(
                    "IN list mixes {} and {}",
                    first.type_name(),
                    odd.type_name()
                ),
            ));
        }
    }
    Ok(())
}

/// `IS NULL` / `IS NOT NULL` for an (in)equality against NULL.
fn null_test(op: CompareOp, value: &Value) -> Option<&'static str> {
    match (op, value) {
        (CompareOp::Eq, Value::Null) => Some("IS NULL"),
        (CompareOp::Ne, Value::Null) => Some("IS NOT NULL"),
        _ => None,
    }
}

fn bind(dialect: Dialect, params: &mut Vec<Value>, offset: usize, value: Value) -> String {
    params.push(value);
    dialect.placeholder(offset + params.len())
}

fn join(
    dialect: Dialect,
    params: &mut Vec<Value>,
    offset: usize,
    children: &[Condition],
    separator: &str,
) -> Result<String> {
    let parts = children
        .iter()
        .map(|c| c.build(dialect, params, offset))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", parts.join(separator)))
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        Condition::Not(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_single_placeholder() {
        let lowered = Condition::gt("age", 18).lower(1).unwrap();
        assert_eq!(lowered.sql, "age > $1");
        assert_eq!(lowered.args, vec![Value::Int(18)]);
        assert_eq!(lowered.next_index, 2);
    }

    #[test]
    fn test_lower_respects_start_index() {
        let lowered = Condition::eq("name", "Ana").lower(4).unwrap();
        assert_eq!(lowered.sql, "name = $4");
        assert_eq!(lowered.next_index, 5);
    }

    #[test]
    fn test_in_consumes_one_placeholder_per_value() {
        let cond = Condition::is_in("id", vec![Value::BigInt(1), Value::BigInt(2), Value::Int(3)])
            .unwrap();
        let lowered = cond.lower(2).unwrap();
        assert_eq!(lowered.sql, "id IN ($2, $3, $4)");
        assert_eq!(lowered.args.len(), 3);
        assert_eq!(lowered.next_index, 5);
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let lowered = Condition::is_in("id", Vec::new()).unwrap().lower(1).unwrap();
        assert_eq!(lowered.sql, "FALSE");
        assert!(lowered.args.is_empty());
        assert_eq!(lowered.next_index, 1);
    }

    #[test]
    fn test_in_rejects_mixed_kinds() {
        let err = Condition::is_in("id", vec![Value::Int(1), Value::Text("2".into())]).unwrap_err();
        match err {
            Error::Validation(v) => {
                assert_eq!(v.kind, ValidationErrorKind::MixedTypes);
                assert_eq!(v.field, "id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_in_rejects_null() {
        assert!(Condition::is_in("id", vec![Value::Int(1), Value::Null]).is_err());
    }

    #[test]
    fn test_lowering_checks_directly_built_in() {
        let cond = Condition::In {
            column: "age".into(),
            values: vec![Value::Int(1), Value::Text("x".into())],
        };
        let err = cond.lower(1).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ref v) if v.kind == ValidationErrorKind::MixedTypes && v.field == "age"
        ));

        // A bad list nested under a composite fails the whole tree.
        let nested = Condition::eq("name", "Ana").and(!Condition::In {
            column: "id".into(),
            values: vec![Value::BigInt(1), Value::Null],
        });
        assert!(nested.lower(1).is_err());
    }

    #[test]
    fn test_lowering_checks_deserialized_in() {
        let cond: Condition = serde_json::from_str(
            r#"{"In":{"column":"age","values":[{"Int":1},{"Text":"x"}]}}"#,
        )
        .unwrap();
        assert!(matches!(cond.lower(1), Err(Error::Validation(_))));

        let ok: Condition =
            serde_json::from_str(r#"{"In":{"column":"age","values":[{"Int":1},{"BigInt":2}]}}"#)
                .unwrap();
        assert_eq!(ok.lower(1).unwrap().sql, "age IN ($1, $2)");
    }

    #[test]
    fn test_start_index_zero_is_rejected() {
        let err = Condition::eq("a", 1).lower(0).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ref v) if v.kind == ValidationErrorKind::Placeholder
        ));
        assert!(Condition::all(Vec::new()).lower(0).is_err());
    }

    #[test]
    fn test_equality_with_null_is_a_null_test() {
        let cond = Condition::eq("email", Value::Null).and(Condition::ne("name", Value::Null));
        let lowered = cond.lower(3).unwrap();
        assert_eq!(lowered.sql, "(email IS NULL AND name IS NOT NULL)");
        assert!(lowered.args.is_empty());
        assert_eq!(lowered.next_index, 3);
        assert_eq!(cond.placeholder_count(), 0);
    }

    #[test]
    fn test_between_low_then_high() {
        let lowered = Condition::between("age", 18, 65).lower(1).unwrap();
        assert_eq!(lowered.sql, "age BETWEEN $1 AND $2");
        assert_eq!(lowered.args, vec![Value::Int(18), Value::Int(65)]);
    }

    #[test]
    fn test_nullness_consumes_nothing() {
        let lowered = Condition::is_not_null("email").lower(3).unwrap();
        assert_eq!(lowered.sql, "email IS NOT NULL");
        assert!(lowered.args.is_empty());
        assert_eq!(lowered.next_index, 3);
    }

    #[test]
    fn test_like_helpers_store_final_pattern() {
        assert_eq!(
            Condition::contains("name", "an"),
            Condition::like("name", "%an%")
        );
        assert_eq!(
            Condition::starts_with("name", "An"),
            Condition::like("name", "An%")
        );
        assert_eq!(
            Condition::ends_with("name", "na"),
            Condition::like("name", "%na")
        );
        let lowered = Condition::contains("name", "an").lower(1).unwrap();
        assert_eq!(lowered.sql, "name LIKE $1");
        assert_eq!(lowered.args, vec![Value::Text("%an%".into())]);
    }

    #[test]
    fn test_empty_composites_are_neutral() {
        assert_eq!(Condition::all(Vec::new()).lower(1).unwrap().sql, "TRUE");
        assert_eq!(Condition::any(Vec::new()).lower(1).unwrap().sql, "FALSE");
    }

    #[test]
    fn test_nested_threading() {
        let cond = Condition::any([
            Condition::eq("status", "active").and(Condition::gt("age", 18)),
            !Condition::between("score", 1, 5),
            Condition::is_null("deleted_at"),
            Condition::like("name", "A%"),
        ]);
        let lowered = cond.lower(1).unwrap();
        assert_eq!(
            lowered.sql,
            "((status = $1 AND age > $2) OR NOT (score BETWEEN $3 AND $4) OR deleted_at IS NULL OR name LIKE $5)"
        );
        assert_eq!(
            lowered.args,
            vec![
                Value::Text("active".into()),
                Value::Int(18),
                Value::Int(1),
                Value::Int(5),
                Value::Text("A%".into()),
            ]
        );
        assert_eq!(lowered.next_index, 6);
        assert_eq!(cond.placeholder_count(), 5);
    }

    #[test]
    fn test_not_keeps_accounting() {
        let inner = Condition::eq("a", 1);
        let negated = !inner.clone();
        assert_eq!(negated.lower(7).unwrap().args, inner.lower(7).unwrap().args);
        assert_eq!(negated.lower(7).unwrap().sql, "NOT (a = $7)");
    }

    #[test]
    fn test_other_dialects() {
        let cond = Condition::eq("a", 1).and(Condition::eq("b", 2));
        assert_eq!(cond.lower_with(Dialect::Sqlite, 1).unwrap().sql, "(a = ?1 AND b = ?2)");
        assert_eq!(cond.lower_with(Dialect::Mysql, 1).unwrap().sql, "(a = ? AND b = ?)");
    }

    #[test]
    fn test_and_extends_conjunction() {
        let cond = Condition::eq("a", 1)
            .and(Condition::eq("b", 2))
            .and(Condition::eq("c", 3));
        assert!(matches!(&cond, Condition::And(children) if children.len() == 3));
    }
}
