//! 资源匹配条件语言
//!
//! Worker认领任务前，Head用任务的条件表达式对Worker上报的资源求值：
//!
//! - `lexer`：把源码切分为标识符、整数和运算符
//! - `parser`：递归下降解析为不可变的语法树
//! - `ast`：对 `WorkerResources` 求值，缺失的资源按 0 处理
//!
//! 空表达式不做解析，始终可认领。表达式在提交时即编译，
//! 格式错误的表达式在提交边界被拒绝，任务不会被创建。

pub mod ast;
pub mod lexer;
pub mod parser;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use batchd_core::WorkerResources;

pub use ast::{CompareOp, Expr};
pub use lexer::{LexError, Lexer, Token, TokenKind};
pub use parser::{ConditionError, ParseError, Parser};

/// A compiled requirement. Cheap to clone; the tree is shared read-only.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    root: Option<Arc<Expr>>,
}

impl Condition {
    pub fn compile(source: &str) -> Result<Self, ConditionError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Ok(Self::always());
        }

        let root = Parser::parse(source)?;
        Ok(Self {
            source: trimmed.to_string(),
            root: Some(Arc::new(root)),
        })
    }

    pub fn always() -> Self {
        Self {
            source: String::new(),
            root: None,
        }
    }

    pub fn is_always(&self) -> bool {
        self.root.is_none()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, resources: &WorkerResources) -> bool {
        match &self.root {
            Some(root) => root.evaluate(resources),
            None => true,
        }
    }

    /// Resource names the expression reads, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        if let Some(root) = &self.root {
            root.collect_identifiers(&mut names);
        }
        names.into_iter().map(str::to_string).collect()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Some(root) => write!(f, "{root}"),
            None => Ok(()),
        }
    }
}
