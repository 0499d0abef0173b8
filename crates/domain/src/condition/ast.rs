use std::collections::BTreeSet;
use std::fmt;

use batchd_core::WorkerResources;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn apply(self, left: i64, right: i64) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        ident: String,
        op: CompareOp,
        value: i64,
    },
}

impl Expr {
    /// Identifiers missing from `resources` read as 0.
    pub fn evaluate(&self, resources: &WorkerResources) -> bool {
        match self {
            Expr::Or(left, right) => left.evaluate(resources) || right.evaluate(resources),
            Expr::And(left, right) => left.evaluate(resources) && right.evaluate(resources),
            Expr::Not(inner) => !inner.evaluate(resources),
            Expr::Compare { ident, op, value } => {
                let actual = resources.get(ident).copied().unwrap_or(0);
                op.apply(actual, *value)
            }
        }
    }

    pub(crate) fn collect_identifiers<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Or(left, right) | Expr::And(left, right) => {
                left.collect_identifiers(out);
                right.collect_identifiers(out);
            }
            Expr::Not(inner) => inner.collect_identifiers(out),
            Expr::Compare { ident, .. } => {
                out.insert(ident.as_str());
            }
        }
    }
}

/// Fully parenthesized rendering; always parses back to an equal tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Or(left, right) => write!(f, "({left} || {right})"),
            Expr::And(left, right) => write!(f, "({left} && {right})"),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::Compare { ident, op, value } => write!(f, "{ident} {} {value}", op.symbol()),
        }
    }
}
