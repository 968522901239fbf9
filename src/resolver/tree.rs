//! Statement tree for function bodies written in the host language.
//!
//! A [`Transpiler`] turns host source into a [`TranspiledFn`]: parameter
//! names, a statement tree and the free identifiers the body needs from the
//! function's externals. The shipped [`JsonTreeTranspiler`] reads the tree
//! directly from its serde form.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::name_registry::is_builtin_function;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "-")]
    Neg,
    #[serde(rename = "!")]
    Not,
    #[serde(rename = "~")]
    BitNot,
}

impl UnaryOp {
    pub fn wgsl(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Rem,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
    #[serde(rename = "&")]
    BitAnd,
    #[serde(rename = "|")]
    BitOr,
    #[serde(rename = "^")]
    BitXor,
    #[serde(rename = "<<")]
    Shl,
    #[serde(rename = ">>")]
    Shr,
}

impl BinaryOp {
    pub fn wgsl(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    #[default]
    #[serde(rename = "=")]
    Assign,
    #[serde(rename = "+=")]
    Add,
    #[serde(rename = "-=")]
    Sub,
    #[serde(rename = "*=")]
    Mul,
    #[serde(rename = "/=")]
    Div,
}

impl AssignOp {
    pub fn wgsl(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Expr {
    Ident {
        name: String,
    },
    Lit {
        value: Value,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        field: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// `cond ? then : otherwise`
    Select {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn ident(name: &str) -> Self {
        Expr::Ident {
            name: name.to_string(),
        }
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Lit {
            value: value.into(),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(callee: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(Expr::ident(callee)),
            args,
        }
    }

    pub fn member(object: Expr, field: &str) -> Self {
        Expr::Member {
            object: Box::new(object),
            field: field.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Statement {
    /// A mutable local (`var`).
    Let {
        name: String,
        init: Expr,
    },
    /// An immutable local (`let`).
    Const {
        name: String,
        init: Expr,
    },
    Assign {
        target: Expr,
        #[serde(default)]
        op: AssignOp,
        value: Expr,
    },
    If {
        cond: Expr,
        then: Vec<Statement>,
        #[serde(default, rename = "else")]
        otherwise: Option<Vec<Statement>>,
    },
    For {
        #[serde(default)]
        init: Option<Box<Statement>>,
        #[serde(default)]
        cond: Option<Expr>,
        #[serde(default)]
        update: Option<Box<Statement>>,
        body: Vec<Statement>,
    },
    While {
        cond: Expr,
        body: Vec<Statement>,
    },
    Block {
        body: Vec<Statement>,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    Break,
    Continue,
    Expr {
        expr: Expr,
    },
}

impl Statement {
    pub fn var(name: &str, init: Expr) -> Self {
        Statement::Let {
            name: name.to_string(),
            init,
        }
    }

    pub fn block(body: Vec<Statement>) -> Self {
        Statement::Block { body }
    }

    pub fn ret(value: Expr) -> Self {
        Statement::Return { value: Some(value) }
    }
}

/// A function body ready for code generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranspiledFn {
    pub params: Vec<String>,
    pub body: Vec<Statement>,
    /// Identifiers the body uses but does not declare, in first-use order.
    pub externals: Vec<String>,
}

impl TranspiledFn {
    pub fn from_tree(params: Vec<String>, body: Vec<Statement>) -> Self {
        let externals = free_identifiers(&params, &body);
        Self {
            params,
            body,
            externals,
        }
    }
}

/// Turns host-language function source into a statement tree.
pub trait Transpiler {
    fn transpile(&self, source: &str) -> Result<TranspiledFn>;
}

#[derive(Deserialize)]
struct JsonFn {
    #[serde(default)]
    params: Vec<String>,
    body: Vec<Statement>,
}

/// Reads `{"params": [...], "body": [...]}` in the serde form of [`Statement`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonTreeTranspiler;

impl Transpiler for JsonTreeTranspiler {
    fn transpile(&self, source: &str) -> Result<TranspiledFn> {
        let parsed: JsonFn = serde_json::from_str(source).context("failed to parse function tree")?;
        Ok(TranspiledFn::from_tree(parsed.params, parsed.body))
    }
}

struct FreeIdents {
    scopes: Vec<HashSet<String>>,
    found: Vec<String>,
}

impl FreeIdents {
    fn declared(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn note(&mut self, name: &str) {
        if !self.declared(name) && !self.found.iter().any(|f| f == name) {
            self.found.push(name.to_string());
        }
    }

    fn block(&mut self, body: &[Statement]) {
        self.scopes.push(HashSet::new());
        for stmt in body {
            self.statement(stmt);
        }
        self.scopes.pop();
    }

    fn statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Let { name, init } | Statement::Const { name, init } => {
                self.expr(init);
                self.declare(name);
            }
            Statement::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            Statement::If { cond, then, otherwise } => {
                self.expr(cond);
                self.block(then);
                if let Some(otherwise) = otherwise {
                    self.block(otherwise);
                }
            }
            Statement::For {
                init,
                cond,
                update,
                body,
            } => {
                self.scopes.push(HashSet::new());
                if let Some(init) = init {
                    self.statement(init);
                }
                if let Some(cond) = cond {
                    self.expr(cond);
                }
                if let Some(update) = update {
                    self.statement(update);
                }
                self.block(body);
                self.scopes.pop();
            }
            Statement::While { cond, body } => {
                self.expr(cond);
                self.block(body);
            }
            Statement::Block { body } => self.block(body),
            Statement::Return { value } => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Statement::Break | Statement::Continue => {}
            Statement::Expr { expr } => self.expr(expr),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Ident { name } => self.note(name),
            Expr::Lit { .. } => {}
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::Call { callee, args } => {
                match callee.as_ref() {
                    Expr::Ident { name } if is_builtin_function(name) && !self.declared(name) => {}
                    other => self.expr(other),
                }
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Select { cond, then, otherwise } => {
                self.expr(cond);
                self.expr(then);
                self.expr(otherwise);
            }
        }
    }
}

/// Identifiers used in `body` that are neither parameters, locals in scope
/// at the point of use, nor builtin functions in call position.
pub fn free_identifiers(params: &[String], body: &[Statement]) -> Vec<String> {
    let mut walker = FreeIdents {
        scopes: vec![params.iter().cloned().collect()],
        found: Vec::new(),
    };
    walker.block(body);
    walker.found
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn free_identifiers_respect_block_scopes() {
        let body = vec![
            Statement::var("y", Expr::lit(1)),
            Statement::block(vec![Statement::var("x", Expr::ident("y"))]),
            Statement::ret(Expr::binary(
                BinaryOp::Add,
                Expr::ident("x"),
                Expr::call("max", vec![Expr::ident("a"), Expr::ident("scale")]),
            )),
        ];
        let tf = TranspiledFn::from_tree(vec!["a".into()], body);
        assert_eq!(tf.externals, ["x", "scale"]);
    }

    #[test]
    fn member_fields_are_not_identifiers() {
        let body = vec![Statement::ret(Expr::member(Expr::ident("light"), "color"))];
        assert_eq!(free_identifiers(&[], &body), ["light"]);
    }

    #[test]
    fn json_transpiler_reads_the_tree() {
        let source = json!({
            "params": ["v"],
            "body": [
                { "kind": "let", "name": "r", "init": { "kind": "binary", "op": "*", "lhs": { "kind": "ident", "name": "v" }, "rhs": { "kind": "lit", "value": 2 } } },
                { "kind": "if", "cond": { "kind": "ident", "name": "flag" }, "then": [ { "kind": "break" } ] },
                { "kind": "return", "value": { "kind": "ident", "name": "r" } }
            ]
        })
        .to_string();
        let tf = JsonTreeTranspiler.transpile(&source).unwrap();
        assert_eq!(tf.params, ["v"]);
        assert_eq!(tf.body.len(), 3);
        assert_eq!(tf.externals, ["flag"]);
        assert!(matches!(&tf.body[1], Statement::If { otherwise: None, .. }));
    }

    #[test]
    fn malformed_trees_are_rejected() {
        let err = JsonTreeTranspiler.transpile(r#"{ "body": [ { "kind": "goto" } ] }"#).unwrap_err();
        assert!(err.to_string().contains("failed to parse function tree"));
    }
}
