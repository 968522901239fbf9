//! WGSL generation for function bodies given as statement trees.

use anyhow::{Result, bail};
use serde_json::Value;

use super::{
    coerce,
    ctx::ResolutionCtx,
    data::DataSchema,
    error::ResolveError,
    item::{FnDef, Wgsl},
    name_registry::is_builtin_function,
    state::{FunctionScope, Identifier},
    tree::{Expr, Statement, TranspiledFn},
};

const INDENT: &str = "  ";

/// Generates the emitted argument names and the `{ ... }` body of a function.
pub(crate) fn generate_fn_body(
    ctx: &mut ResolutionCtx,
    label: Option<&str>,
    def: &FnDef,
    tree: &TranspiledFn,
) -> Result<(Vec<String>, String)> {
    let missing: Vec<String> = tree
        .externals
        .iter()
        .filter(|name| !def.externals.iter().any(|(ext, _)| ext == *name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ResolveError::MissingExternals {
            function: label.unwrap_or("<unnamed>").to_string(),
            names: missing,
        }
        .into());
    }
    if tree.params.len() != def.args.len() {
        bail!(
            "function body takes {} parameters but {} arguments are declared",
            tree.params.len(),
            def.args.len()
        );
    }

    ctx.names().push_function_scope();
    let result = function(ctx, def, tree);
    ctx.names().pop_function_scope();
    result
}

fn function(ctx: &mut ResolutionCtx, def: &FnDef, tree: &TranspiledFn) -> Result<(Vec<String>, String)> {
    let mut args = Vec::with_capacity(def.args.len());
    for arg in &def.args {
        args.push(ctx.names().make_valid(&arg.name)?);
    }
    let scope = FunctionScope {
        args: tree.params.iter().cloned().zip(args.iter().cloned()).collect(),
        externals: def.externals.clone(),
        returns: def.ret.as_ref().map(|r| r.schema.clone()),
    };

    ctx.state().push_function_scope(scope);
    let body = block(ctx, &tree.body, 0);
    ctx.state().pop_function_scope();
    Ok((args, body?))
}

fn block(ctx: &mut ResolutionCtx, body: &[Statement], depth: usize) -> Result<String> {
    ctx.names().push_block_scope();
    ctx.state().push_block_scope();
    let lines: Result<Vec<String>> = body
        .iter()
        .map(|stmt| statement(ctx, stmt, depth + 1).map(|s| format!("{}{s}", INDENT.repeat(depth + 1))))
        .collect();
    ctx.state().pop_block_scope();
    ctx.names().pop_block_scope();

    let lines = lines?;
    if lines.is_empty() {
        return Ok("{}".to_string());
    }
    Ok(format!("{{\n{}\n{}}}", lines.join("\n"), INDENT.repeat(depth)))
}

fn statement(ctx: &mut ResolutionCtx, stmt: &Statement, depth: usize) -> Result<String> {
    match stmt {
        Statement::Let { .. } | Statement::Const { .. } | Statement::Assign { .. } | Statement::Expr { .. } => {
            Ok(format!("{};", simple_statement(ctx, stmt)?))
        }
        Statement::If { cond, then, otherwise } => {
            let cond = condition(ctx, cond)?;
            let then = block(ctx, then, depth)?;
            match otherwise {
                Some(otherwise) => Ok(format!("if {cond} {then} else {}", block(ctx, otherwise, depth)?)),
                None => Ok(format!("if {cond} {then}")),
            }
        }
        Statement::For {
            init,
            cond,
            update,
            body,
        } => {
            ctx.names().push_block_scope();
            ctx.state().push_block_scope();
            let result = for_loop(ctx, init.as_deref(), cond.as_ref(), update.as_deref(), body, depth);
            ctx.state().pop_block_scope();
            ctx.names().pop_block_scope();
            result
        }
        Statement::While { cond, body } => {
            let cond = condition(ctx, cond)?;
            Ok(format!("while {cond} {}", block(ctx, body, depth)?))
        }
        Statement::Block { body } => block(ctx, body, depth),
        Statement::Return { value: None } => Ok("return;".to_string()),
        Statement::Return { value: Some(value) } => {
            let ret = ctx.state().function_return().cloned();
            let value = match ret {
                Some(schema) => expr_as(ctx, value, &schema)?,
                None => expr(ctx, value)?,
            };
            Ok(format!("return {value};"))
        }
        Statement::Break => Ok("break;".to_string()),
        Statement::Continue => Ok("continue;".to_string()),
    }
}

fn for_loop(
    ctx: &mut ResolutionCtx,
    init: Option<&Statement>,
    cond: Option<&Expr>,
    update: Option<&Statement>,
    body: &[Statement],
    depth: usize,
) -> Result<String> {
    let init = init.map(|s| simple_statement(ctx, s)).transpose()?.unwrap_or_default();
    let cond = cond.map(|c| condition(ctx, c)).transpose()?.unwrap_or_default();
    let update = update.map(|s| simple_statement(ctx, s)).transpose()?.unwrap_or_default();
    let body = block(ctx, body, depth)?;
    Ok(format!("for ({init}; {cond}; {update}) {body}"))
}

/// Statements that can also appear in a `for` header (no trailing `;`).
fn simple_statement(ctx: &mut ResolutionCtx, stmt: &Statement) -> Result<String> {
    match stmt {
        Statement::Let { name, init } => declare_local(ctx, "var", name, init),
        Statement::Const { name, init } => declare_local(ctx, "let", name, init),
        Statement::Assign { target, op, value } => {
            let target = expr(ctx, target)?;
            let value = expr(ctx, value)?;
            Ok(format!("{target} {} {value}", op.wgsl()))
        }
        Statement::Expr { expr: e } => expr(ctx, e),
        _ => bail!("only declarations, assignments and expressions are allowed in a for header"),
    }
}

fn declare_local(ctx: &mut ResolutionCtx, keyword: &str, name: &str, init: &Expr) -> Result<String> {
    // The initializer is emitted first so it still sees any outer `name`.
    let value = expr(ctx, init)?;
    let emitted = ctx.names().make_valid(name)?;
    ctx.state().define_local(name, &emitted);
    Ok(format!("{keyword} {emitted} = {value}"))
}

fn condition(ctx: &mut ResolutionCtx, cond: &Expr) -> Result<String> {
    let literal = match cond {
        Expr::Lit { value } => Some(value.clone()),
        _ => external_literal(ctx, cond)?,
    };
    if let Some(value) = literal {
        if !value.is_boolean() {
            bail!("cannot coerce {value} to bool: conditions must be boolean");
        }
    }
    expr(ctx, cond)
}

/// Emits `e`, coercing host literals (inline or from externals) to `schema`.
fn expr_as(ctx: &mut ResolutionCtx, e: &Expr, schema: &DataSchema) -> Result<String> {
    if let Expr::Lit { value } = e {
        return coerce::resolve_literal(ctx, value, Some(schema));
    }
    if let Some(value) = external_literal(ctx, e)? {
        return coerce::resolve_literal(ctx, &value, Some(schema));
    }
    expr(ctx, e)
}

fn expr(ctx: &mut ResolutionCtx, e: &Expr) -> Result<String> {
    match e {
        Expr::Ident { name } => identifier(ctx, name),
        Expr::Lit { value } => coerce::resolve_literal(ctx, value, None),
        Expr::Unary { op, operand } => {
            let text = expr(ctx, operand)?;
            let wrap = matches!(operand.as_ref(), Expr::Binary { .. } | Expr::Unary { .. }) || text.starts_with('-');
            if wrap {
                Ok(format!("{}({text})", op.wgsl()))
            } else {
                Ok(format!("{}{text}", op.wgsl()))
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = operand(ctx, lhs)?;
            let rhs = operand(ctx, rhs)?;
            Ok(format!("{lhs} {} {rhs}", op.wgsl()))
        }
        Expr::Call { callee, args } => {
            let callee = match callee.as_ref() {
                Expr::Ident { name } => callee_name(ctx, name)?,
                other => expr(ctx, other)?,
            };
            let args = args.iter().map(|a| expr(ctx, a)).collect::<Result<Vec<_>>>()?;
            Ok(format!("{callee}({})", args.join(", ")))
        }
        Expr::Member { object, field } => {
            if let Some(value) = external_literal(ctx, e)? {
                return coerce::resolve_literal(ctx, &value, None);
            }
            Ok(format!("{}.{field}", operand(ctx, object)?))
        }
        Expr::Index { object, index } => {
            let object = operand(ctx, object)?;
            let index = expr(ctx, index)?;
            Ok(format!("{object}[{index}]"))
        }
        Expr::Select { cond, then, otherwise } => {
            let otherwise = expr(ctx, otherwise)?;
            let then = expr(ctx, then)?;
            let cond = expr(ctx, cond)?;
            Ok(format!("select({otherwise}, {then}, {cond})"))
        }
    }
}

/// Nested binary expressions are parenthesized so WGSL never has to decide
/// precedence between mixed operators.
fn operand(ctx: &mut ResolutionCtx, e: &Expr) -> Result<String> {
    let text = expr(ctx, e)?;
    if matches!(e, Expr::Binary { .. }) {
        Ok(format!("({text})"))
    } else {
        Ok(text)
    }
}

fn identifier(ctx: &mut ResolutionCtx, name: &str) -> Result<String> {
    match ctx.state().lookup(name) {
        Some(Identifier::Local(emitted) | Identifier::Arg(emitted)) => Ok(emitted),
        Some(Identifier::External(value)) => ctx.resolve(&value),
        None => Err(ResolveError::UndefinedIdentifier(name.to_string()).into()),
    }
}

fn callee_name(ctx: &mut ResolutionCtx, name: &str) -> Result<String> {
    match ctx.state().lookup(name) {
        Some(_) => identifier(ctx, name),
        None if is_builtin_function(name) => Ok(name.to_string()),
        None => Err(ResolveError::UndefinedIdentifier(name.to_string()).into()),
    }
}

/// The host value an identifier or member chain denotes when it starts at an
/// external bound to a literal.
fn external_literal(ctx: &mut ResolutionCtx, e: &Expr) -> Result<Option<Value>> {
    match e {
        Expr::Ident { name } => {
            let Some(Identifier::External(value)) = ctx.state().lookup(name) else {
                return Ok(None);
            };
            match ctx.unwrap(&value)? {
                Wgsl::Literal(literal) => Ok(Some(literal)),
                _ => Ok(None),
            }
        }
        Expr::Member { object, field } => match external_literal(ctx, object)? {
            Some(Value::Object(fields)) => match fields.get(field) {
                Some(value) => Ok(Some(value.clone())),
                None => bail!("external object has no field `{field}`"),
            },
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}
