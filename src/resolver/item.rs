//! Resolvable values and the item primitives (functions, constants, raw code).

use std::{
    fmt,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{Result, bail};
use serde_json::Value;

use super::{
    binding::{self, BindGroupLayout, LayoutEntry, Resource},
    codegen,
    ctx::ResolutionCtx,
    data::{DataSchema, StructSchema},
    name_registry::is_valid_identifier,
    slot::{AccessorDef, Derived, Slot},
    tree::{TranspiledFn, Transpiler},
};

/// Process-unique identity of an item, slot, derived value or struct schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u64);

impl ItemId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything the engine can turn into WGSL text.
#[derive(Clone, Debug)]
pub enum Wgsl {
    Item(Item),
    Slot(Slot),
    Derived(Derived),
    Schema(DataSchema),
    /// A plain host value (number, bool, array or object).
    Literal(Value),
}

impl Wgsl {
    pub fn literal(value: impl Into<Value>) -> Self {
        Wgsl::Literal(value.into())
    }

    /// Identity for graph objects, structural equality for host literals.
    pub fn same(&self, other: &Wgsl) -> bool {
        match (self, other) {
            (Wgsl::Item(a), Wgsl::Item(b)) => a.ptr_eq(b),
            (Wgsl::Slot(a), Wgsl::Slot(b)) => a.ptr_eq(b),
            (Wgsl::Derived(a), Wgsl::Derived(b)) => a.ptr_eq(b),
            (Wgsl::Schema(a), Wgsl::Schema(b)) => a.same(b),
            (Wgsl::Literal(a), Wgsl::Literal(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Wgsl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wgsl::Item(item) => write!(f, "{item}"),
            Wgsl::Slot(slot) => write!(f, "{slot}"),
            Wgsl::Derived(derived) => write!(f, "{derived}"),
            Wgsl::Schema(schema) => write!(f, "schema:{schema}"),
            Wgsl::Literal(value) => write!(f, "{value}"),
        }
    }
}

impl From<Item> for Wgsl {
    fn from(item: Item) -> Self {
        Wgsl::Item(item)
    }
}

impl From<&Item> for Wgsl {
    fn from(item: &Item) -> Self {
        Wgsl::Item(item.clone())
    }
}

impl From<Slot> for Wgsl {
    fn from(slot: Slot) -> Self {
        Wgsl::Slot(slot)
    }
}

impl From<&Slot> for Wgsl {
    fn from(slot: &Slot) -> Self {
        Wgsl::Slot(slot.clone())
    }
}

impl From<Derived> for Wgsl {
    fn from(derived: Derived) -> Self {
        Wgsl::Derived(derived)
    }
}

impl From<&Derived> for Wgsl {
    fn from(derived: &Derived) -> Self {
        Wgsl::Derived(derived.clone())
    }
}

impl From<DataSchema> for Wgsl {
    fn from(schema: DataSchema) -> Self {
        Wgsl::Schema(schema)
    }
}

impl From<StructSchema> for Wgsl {
    fn from(schema: StructSchema) -> Self {
        Wgsl::Schema(DataSchema::Struct(schema))
    }
}

impl From<Value> for Wgsl {
    fn from(value: Value) -> Self {
        Wgsl::Literal(value)
    }
}

impl From<f64> for Wgsl {
    fn from(value: f64) -> Self {
        Wgsl::Literal(value.into())
    }
}

impl From<i32> for Wgsl {
    fn from(value: i32) -> Self {
        Wgsl::Literal(value.into())
    }
}

impl From<u32> for Wgsl {
    fn from(value: u32) -> Self {
        Wgsl::Literal(value.into())
    }
}

impl From<bool> for Wgsl {
    fn from(value: bool) -> Self {
        Wgsl::Literal(value.into())
    }
}

pub type Externals = Vec<(String, Wgsl)>;

/// Pipeline stage attributes of a function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FnStage {
    #[default]
    Plain,
    Compute {
        workgroup_size: [u32; 3],
    },
    Vertex,
    Fragment,
}

impl FnStage {
    fn attributes(self) -> String {
        match self {
            FnStage::Plain => String::new(),
            FnStage::Compute {
                workgroup_size: [x, y, z],
            } => format!("@compute @workgroup_size({x}, {y}, {z}) "),
            FnStage::Vertex => "@vertex ".to_string(),
            FnStage::Fragment => "@fragment ".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FnArg {
    pub name: String,
    pub schema: DataSchema,
    pub attribute: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FnReturn {
    pub schema: DataSchema,
    pub attribute: Option<String>,
}

#[derive(Clone)]
pub enum FnBody {
    /// A raw WGSL block (`{ ... }`). Arguments keep their declared names.
    Wgsl(String),
    /// A statement tree that was already transpiled.
    Tree(TranspiledFn),
    /// Host source handed to a transpiler when the function is resolved.
    Source {
        source: String,
        transpiler: Rc<dyn Transpiler>,
    },
}

impl fmt::Debug for FnBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FnBody::Wgsl(text) => f.debug_tuple("Wgsl").field(text).finish(),
            FnBody::Tree(tree) => f.debug_tuple("Tree").field(tree).finish(),
            FnBody::Source { source, .. } => f.debug_struct("Source").field("source", source).finish(),
        }
    }
}

/// A shader function definition. Built with chained setters and turned into an
/// [`Item`] with [`Item::function`].
#[derive(Clone, Debug)]
pub struct FnDef {
    pub label: Option<String>,
    pub stage: FnStage,
    pub args: Vec<FnArg>,
    pub ret: Option<FnReturn>,
    pub body: FnBody,
    pub externals: Externals,
}

impl FnDef {
    pub fn new(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            stage: FnStage::Plain,
            args: Vec::new(),
            ret: None,
            body: FnBody::Wgsl("{}".to_string()),
            externals: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: FnStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn arg(mut self, name: &str, schema: DataSchema) -> Self {
        self.args.push(FnArg {
            name: name.to_string(),
            schema,
            attribute: None,
        });
        self
    }

    pub fn arg_with_attribute(mut self, name: &str, schema: DataSchema, attribute: &str) -> Self {
        self.args.push(FnArg {
            name: name.to_string(),
            schema,
            attribute: Some(attribute.to_string()),
        });
        self
    }

    pub fn returns(mut self, schema: DataSchema) -> Self {
        self.ret = Some(FnReturn {
            schema,
            attribute: None,
        });
        self
    }

    pub fn returns_with_attribute(mut self, schema: DataSchema, attribute: &str) -> Self {
        self.ret = Some(FnReturn {
            schema,
            attribute: Some(attribute.to_string()),
        });
        self
    }

    pub fn body(mut self, wgsl: &str) -> Self {
        self.body = FnBody::Wgsl(wgsl.to_string());
        self
    }

    pub fn tree(mut self, tree: TranspiledFn) -> Self {
        self.body = FnBody::Tree(tree);
        self
    }

    pub fn source(mut self, source: &str, transpiler: Rc<dyn Transpiler>) -> Self {
        self.body = FnBody::Source {
            source: source.to_string(),
            transpiler,
        };
        self
    }

    pub fn external(mut self, name: &str, value: impl Into<Wgsl>) -> Self {
        self.externals.push((name.to_string(), value.into()));
        self
    }
}

/// Raw text plus the externals substituted into it.
#[derive(Clone, Debug)]
pub struct Template {
    pub text: String,
    pub externals: Externals,
}

#[derive(Debug)]
pub(crate) enum ItemKind {
    Fn(FnDef),
    Const { schema: DataSchema, value: Wgsl },
    Code(Template),
    Declare(Template),
    Bound { inner: Wgsl, bindings: Vec<(Slot, Wgsl)> },
    Accessor(AccessorDef),
    Fixed { entry: LayoutEntry, resource: Resource },
    LayoutBinding {
        layout: BindGroupLayout,
        key: String,
        binding: u32,
        entry: LayoutEntry,
    },
}

impl ItemKind {
    fn name(&self) -> &'static str {
        match self {
            ItemKind::Fn(_) => "fn",
            ItemKind::Const { .. } => "const",
            ItemKind::Code(_) => "code",
            ItemKind::Declare(_) => "declare",
            ItemKind::Bound { .. } => "bound",
            ItemKind::Accessor(_) => "accessor",
            ItemKind::Fixed { .. } => "resource",
            ItemKind::LayoutBinding { .. } => "binding",
        }
    }
}

struct ItemNode {
    id: ItemId,
    label: Option<String>,
    kind: ItemKind,
}

/// A node of the shader graph. Cloning shares the node; identity is the node.
#[derive(Clone)]
pub struct Item(Rc<ItemNode>);

impl Item {
    pub(crate) fn from_kind(label: Option<&str>, kind: ItemKind) -> Self {
        Self(Rc::new(ItemNode {
            id: ItemId::next(),
            label: label.map(str::to_string),
            kind,
        }))
    }

    pub fn function(def: FnDef) -> Self {
        let label = def.label.clone();
        Self::from_kind(label.as_deref(), ItemKind::Fn(def))
    }

    pub fn constant(label: &str, schema: DataSchema, value: impl Into<Wgsl>) -> Self {
        Self::from_kind(
            Some(label),
            ItemKind::Const {
                schema,
                value: value.into(),
            },
        )
    }

    /// Inline code: resolves to `text` with every external substituted.
    pub fn code(text: &str, externals: Externals) -> Self {
        Self::from_kind(
            None,
            ItemKind::Code(Template {
                text: text.to_string(),
                externals,
            }),
        )
    }

    /// A raw top-level declaration, emitted once with externals substituted.
    pub fn declare(text: &str, externals: Externals) -> Self {
        Self::from_kind(
            None,
            ItemKind::Declare(Template {
                text: text.to_string(),
                externals,
            }),
        )
    }

    /// This item with `slot` bound to `value` while it (and everything it
    /// pulls in) is resolved.
    pub fn with(&self, slot: &Slot, value: impl Into<Wgsl>) -> Item {
        self.with_slots(vec![(slot.clone(), value.into())])
    }

    pub fn with_slots(&self, bindings: Vec<(Slot, Wgsl)>) -> Item {
        Self::from_kind(
            self.label(),
            ItemKind::Bound {
                inner: Wgsl::Item(self.clone()),
                bindings,
            },
        )
    }

    pub fn id(&self) -> ItemId {
        self.0.id
    }

    pub fn label(&self) -> Option<&str> {
        self.0.label.as_deref()
    }

    pub fn ptr_eq(&self, other: &Item) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn kind(&self) -> &ItemKind {
        &self.0.kind
    }

    /// Functions (possibly wrapped in slot bindings) are called, not read.
    pub fn is_callable(&self) -> bool {
        match &self.0.kind {
            ItemKind::Fn(_) => true,
            ItemKind::Bound {
                inner: Wgsl::Item(inner),
                ..
            } => inner.is_callable(),
            _ => false,
        }
    }

    /// Produces this item's text without consulting the memo table.
    pub(crate) fn resolve_fresh(&self, ctx: &mut ResolutionCtx) -> Result<String> {
        match &self.0.kind {
            ItemKind::Fn(def) => resolve_fn(ctx, self.label(), def),
            ItemKind::Const { schema, value } => {
                let name = ctx.names().make_unique(self.label(), true)?;
                let ty = ctx.resolve_schema(schema)?;
                let value = ctx.resolve_as(value, schema)?;
                ctx.add_declaration(format!("const {name}: {ty} = {value};"));
                Ok(name)
            }
            ItemKind::Code(template) => replace_externals(ctx, &template.text, &template.externals),
            ItemKind::Declare(template) => {
                let text = replace_externals(ctx, &template.text, &template.externals)?;
                ctx.add_declaration(text);
                Ok(String::new())
            }
            ItemKind::Bound { inner, bindings } => {
                ctx.with_slots(bindings.clone(), |ctx| ctx.resolve(inner))
            }
            ItemKind::Accessor(def) => def.resolve(ctx),
            ItemKind::Fixed { entry, resource } => {
                binding::resolve_fixed(ctx, self.label(), entry, resource)
            }
            ItemKind::LayoutBinding {
                layout,
                key,
                binding,
                entry,
            } => binding::resolve_layout_binding(ctx, layout, key, *binding, entry),
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.0.kind.name(),
            self.label().unwrap_or("<unnamed>")
        )
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn resolve_fn(ctx: &mut ResolutionCtx, label: Option<&str>, def: &FnDef) -> Result<String> {
    let name = ctx.names().make_unique(label, true)?;

    let mut arg_types = Vec::with_capacity(def.args.len());
    for arg in &def.args {
        arg_types.push(ctx.resolve_schema(&arg.schema)?);
    }
    let ret = match &def.ret {
        Some(ret) => {
            let ty = ctx.resolve_schema(&ret.schema)?;
            match &ret.attribute {
                Some(attr) => format!(" -> {attr} {ty}"),
                None => format!(" -> {ty}"),
            }
        }
        None => String::new(),
    };

    let (arg_names, body) = match &def.body {
        FnBody::Wgsl(text) => {
            for arg in &def.args {
                if !is_valid_identifier(&arg.name) {
                    bail!("argument name `{}` is not a valid WGSL identifier", arg.name);
                }
            }
            // Globals issued while substituting must not collide with the
            // parameters, which would shadow them inside this body.
            ctx.names().push_function_scope();
            for arg in &def.args {
                ctx.names().reserve(&arg.name);
            }
            let body = replace_externals(ctx, text.trim(), &def.externals);
            ctx.names().pop_function_scope();
            (def.args.iter().map(|a| a.name.clone()).collect(), body?)
        }
        FnBody::Tree(tree) => codegen::generate_fn_body(ctx, label, def, tree)?,
        FnBody::Source { source, transpiler } => {
            let tree = transpiler.transpile(source)?;
            codegen::generate_fn_body(ctx, label, def, &tree)?
        }
    };

    let args: Vec<String> = def
        .args
        .iter()
        .zip(arg_names.iter().zip(arg_types.iter()))
        .map(|(arg, (name, ty))| match &arg.attribute {
            Some(attr) => format!("{attr} {name}: {ty}"),
            None => format!("{name}: {ty}"),
        })
        .collect();

    ctx.add_declaration(format!(
        "{}fn {name}({}){ret} {body}",
        def.stage.attributes(),
        args.join(", ")
    ));
    Ok(name)
}

/// Replaces every external name in `text` with its resolved form.
///
/// Only whole identifiers not preceded by `.` are replaced. When an external
/// unwraps to an object literal, a following `.field` path is consumed and
/// the nested value is substituted. Comments and numeric literals are copied
/// through untouched.
pub(crate) fn replace_externals(
    ctx: &mut ResolutionCtx,
    text: &str,
    externals: &[(String, Wgsl)],
) -> Result<String> {
    if externals.is_empty() {
        return Ok(text.to_string());
    }

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut copied = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            i = text[i..].find('\n').map_or(bytes.len(), |n| i + n);
        } else if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i = text[i + 2..].find("*/").map_or(bytes.len(), |n| i + 2 + n + 2);
        } else if c.is_ascii_digit() {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.' || bytes[i] == b'_') {
                i += 1;
            }
        } else if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let word = &text[start..i];
            let after_dot = start > 0 && bytes[start - 1] == b'.';
            if after_dot {
                continue;
            }
            let Some((_, value)) = externals.iter().find(|(name, _)| name == word) else {
                continue;
            };
            let (resolved, consumed) = resolve_external_path(ctx, value, &text[i..])?;
            out.push_str(&text[copied..start]);
            out.push_str(&resolved);
            i += consumed;
            copied = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&text[copied..]);
    Ok(out)
}

/// Resolves an external, following `.field` accesses into object literals.
/// Returns the text and how many bytes of `rest` the path consumed.
fn resolve_external_path(ctx: &mut ResolutionCtx, value: &Wgsl, rest: &str) -> Result<(String, usize)> {
    let value = ctx.unwrap(value)?;
    let Wgsl::Literal(mut literal @ Value::Object(_)) = value else {
        return Ok((ctx.resolve(&value)?, 0));
    };

    let mut consumed = 0;
    while let Some(after) = rest[consumed..].strip_prefix('.') {
        let len = after
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .count();
        let field = &after[..len];
        let Some(next) = literal.get(field).cloned() else {
            break;
        };
        literal = next;
        consumed += 1 + len;
        if !literal.is_object() {
            break;
        }
    }
    Ok((ctx.resolve(&Wgsl::Literal(literal))?, consumed))
}
