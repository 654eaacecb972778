//! Filter expressions: immutable predicate trees over entity fields.
//!
//! Leaves are [`FilterPredicate`]s naming a [`Path`], an [`Operator`] and a list
//! of operands. Trees are combined with [`FilterExpression::and`],
//! [`FilterExpression::or`] and [`FilterExpression::not`], which never touch
//! their inputs. Paths are resolved against the entity metadata only when a
//! query is built, see [`crate::query`].

use std::fmt;

use crate::path::Path;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    In,
    NotIn,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    Prefix,
    Postfix,
    Infix,
    IsNull,
    NotNull,
    True,
    False,
}

/// How many operands an operator takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    One,
    Two,
    Any,
}

impl Operator {
    pub fn arity(&self) -> Arity {
        match self {
            Operator::In | Operator::NotIn => Arity::Any,
            Operator::Between => Arity::Two,
            Operator::IsNull | Operator::NotNull | Operator::True | Operator::False => Arity::None,
            _ => Arity::One,
        }
    }
    pub fn accepts(&self, operands: usize) -> bool {
        match self.arity() {
            Arity::None => operands == 0,
            Arity::One => operands == 1,
            Arity::Two => operands == 2,
            Arity::Any => true,
        }
    }
    /// Operators that only make sense on text.
    pub fn is_textual(&self) -> bool {
        matches!(self, Operator::Prefix | Operator::Postfix | Operator::Infix)
    }
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Between => "between",
            Operator::Prefix => "prefix",
            Operator::Postfix => "postfix",
            Operator::Infix => "infix",
            Operator::IsNull => "isnull",
            Operator::NotNull => "notnull",
            Operator::True => "true",
            Operator::False => "false",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterPredicate {
    path: Path,
    operator: Operator,
    values: Vec<Value>,
}

impl FilterPredicate {
    pub fn new(path: Path, operator: Operator, values: Vec<Value>) -> Self {
        Self { path, operator, values }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn operator(&self) -> Operator {
        self.operator
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(f, "{} {} [{}]", self.path, self.operator.name(), values.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    Predicate(FilterPredicate),
    And(Box<FilterExpression>, Box<FilterExpression>),
    Or(Box<FilterExpression>, Box<FilterExpression>),
    Not(Box<FilterExpression>),
}

impl FilterExpression {
    pub fn predicate(path: Path, operator: Operator, values: Vec<Value>) -> Self {
        FilterExpression::Predicate(FilterPredicate::new(path, operator, values))
    }
    pub fn and(&self, other: &FilterExpression) -> Self {
        FilterExpression::And(Box::new(self.clone()), Box::new(other.clone()))
    }
    pub fn or(&self, other: &FilterExpression) -> Self {
        FilterExpression::Or(Box::new(self.clone()), Box::new(other.clone()))
    }
    pub fn not(&self) -> Self {
        FilterExpression::Not(Box::new(self.clone()))
    }
    /// Conjoins an optional expression with another one.
    pub fn and_maybe(existing: Option<&FilterExpression>, other: FilterExpression) -> Self {
        match existing {
            Some(e) => e.and(&other),
            None => other,
        }
    }
    /// All leaf predicates, left to right.
    pub fn predicates(&self) -> Vec<&FilterPredicate> {
        let mut leaves = Vec::new();
        self.collect(&mut leaves);
        leaves
    }
    fn collect<'a>(&'a self, leaves: &mut Vec<&'a FilterPredicate>) {
        match self {
            FilterExpression::Predicate(p) => leaves.push(p),
            FilterExpression::And(l, r) | FilterExpression::Or(l, r) => {
                l.collect(leaves);
                r.collect(leaves);
            }
            FilterExpression::Not(inner) => inner.collect(leaves),
        }
    }
}

impl From<FilterPredicate> for FilterExpression {
    fn from(p: FilterPredicate) -> Self {
        FilterExpression::Predicate(p)
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FilterExpression::Predicate(p) => write!(f, "{p}"),
            FilterExpression::And(l, r) => write!(f, "({l} AND {r})"),
            FilterExpression::Or(l, r) => write!(f, "({l} OR {r})"),
            FilterExpression::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}
