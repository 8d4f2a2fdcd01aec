//! Clause-level state accumulated by the query builder.

use std::fmt;

use serde_json::Value;

use super::SubBuilderFn;

/// A rendered statement plus its positional parameters, in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CmpOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" | "==" => Some(CmpOp::Eq),
            "!=" | "<>" => Some(CmpOp::Ne),
            "<" => Some(CmpOp::Lt),
            "<=" => Some(CmpOp::Le),
            ">" => Some(CmpOp::Gt),
            ">=" => Some(CmpOp::Ge),
            "like" | "LIKE" => Some(CmpOp::Like),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Like => "LIKE",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Soft-delete visibility for a single query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrashMode {
    /// Hide soft-deleted rows when the discipline is enabled.
    #[default]
    Default,
    /// Include soft-deleted rows.
    WithTrashed,
    /// Only soft-deleted rows.
    OnlyTrashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

/// One predicate, in call order.
#[derive(Clone)]
pub struct WhereClause {
    pub conjunction: Conjunction,
    pub expr: WhereExpr,
}

#[derive(Clone)]
pub enum WhereExpr {
    Compare {
        column: String,
        op: CmpOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
    },
    Null {
        column: String,
        negated: bool,
    },
    /// Existence subquery against a relation alias.
    Exists {
        alias: String,
        negated: bool,
        constraint: Option<SubBuilderFn>,
    },
}

impl fmt::Debug for WhereExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhereExpr::Compare { column, op, value } => {
                write!(f, "Compare({column} {op} {value})")
            }
            WhereExpr::In {
                column,
                values,
                negated,
            } => write!(f, "In({column}, {} values, negated={negated})", values.len()),
            WhereExpr::Between { column, .. } => write!(f, "Between({column})"),
            WhereExpr::Null { column, negated } => write!(f, "Null({column}, negated={negated})"),
            WhereExpr::Exists { alias, negated, .. } => {
                write!(f, "Exists({alias}, negated={negated})")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderClause {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone)]
pub struct HavingClause {
    pub expression: String,
    pub op: CmpOp,
    pub value: Value,
}

/// Accepted inputs for `with`: positional strings (possibly dotted), string
/// sequences, nothing, or an alias constrained by a sub-builder callback.
#[derive(Clone)]
pub enum WithSpec {
    One(String),
    Many(Vec<String>),
    Constrained(String, SubBuilderFn),
    None,
}

impl From<&str> for WithSpec {
    fn from(s: &str) -> Self {
        WithSpec::One(s.to_string())
    }
}

impl From<String> for WithSpec {
    fn from(s: String) -> Self {
        WithSpec::One(s)
    }
}

impl From<Vec<&str>> for WithSpec {
    fn from(v: Vec<&str>) -> Self {
        WithSpec::Many(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for WithSpec {
    fn from(v: Vec<String>) -> Self {
        WithSpec::Many(v)
    }
}

impl From<Option<&str>> for WithSpec {
    fn from(v: Option<&str>) -> Self {
        match v {
            Some(s) => WithSpec::One(s.to_string()),
            None => WithSpec::None,
        }
    }
}

impl WithSpec {
    pub fn constrained(alias: impl Into<String>, constraint: SubBuilderFn) -> Self {
        WithSpec::Constrained(alias.into(), constraint)
    }
}
