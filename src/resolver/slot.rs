//! Slots (late-bound values), derived values and typed accessors.

use std::{fmt, rc::Rc};

use anyhow::{Result, bail};
use serde_json::Value;

use super::{
    coerce,
    ctx::ResolutionCtx,
    data::DataSchema,
    item::{Item, ItemId, ItemKind, Wgsl},
};

/// Decides whether two values bound to a slot count as the same binding.
pub type SlotEq = fn(&Wgsl, &Wgsl) -> bool;

fn default_eq(a: &Wgsl, b: &Wgsl) -> bool {
    a.same(b)
}

struct SlotDef {
    id: ItemId,
    label: Option<String>,
    default: Option<Wgsl>,
    eq: SlotEq,
}

/// A named placeholder whose value is supplied by whoever resolves the item
/// that reads it.
#[derive(Clone)]
pub struct Slot(Rc<SlotDef>);

impl Slot {
    pub fn new(label: Option<&str>) -> Self {
        Self::custom(label, None, default_eq)
    }

    pub fn with_default(label: Option<&str>, default: impl Into<Wgsl>) -> Self {
        Self::custom(label, Some(default.into()), default_eq)
    }

    pub fn custom(label: Option<&str>, default: Option<Wgsl>, eq: SlotEq) -> Self {
        Self(Rc::new(SlotDef {
            id: ItemId::next(),
            label: label.map(str::to_string),
            default,
            eq,
        }))
    }

    pub fn id(&self) -> ItemId {
        self.0.id
    }

    pub fn label(&self) -> Option<&str> {
        self.0.label.as_deref()
    }

    pub fn default_value(&self) -> Option<&Wgsl> {
        self.0.default.as_ref()
    }

    /// Equality used when replaying memoized results.
    pub fn are_equal(&self, a: &Wgsl, b: &Wgsl) -> bool {
        (self.0.eq)(a, b)
    }

    pub fn ptr_eq(&self, other: &Slot) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot:{}", self.label().unwrap_or("<unnamed>"))
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

pub type ComputeFn = dyn Fn(&mut ResolutionCtx) -> Result<Wgsl>;

struct DerivedDef {
    id: ItemId,
    label: Option<String>,
    compute: Box<ComputeFn>,
}

/// A value computed from slot reads, memoized per distinct set of slot values.
///
/// The compute function runs in normal (non code generation) mode: it may
/// read slots and unwrap values but must not resolve anything to text.
#[derive(Clone)]
pub struct Derived(Rc<DerivedDef>);

impl Derived {
    pub fn new(
        label: Option<&str>,
        compute: impl Fn(&mut ResolutionCtx) -> Result<Wgsl> + 'static,
    ) -> Self {
        Self(Rc::new(DerivedDef {
            id: ItemId::next(),
            label: label.map(str::to_string),
            compute: Box::new(compute),
        }))
    }

    pub fn id(&self) -> ItemId {
        self.0.id
    }

    pub fn label(&self) -> Option<&str> {
        self.0.label.as_deref()
    }

    pub(crate) fn compute(&self, ctx: &mut ResolutionCtx) -> Result<Wgsl> {
        (self.0.compute)(ctx)
    }

    pub fn ptr_eq(&self, other: &Derived) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for Derived {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "derived:{}", self.label().unwrap_or("<unnamed>"))
    }
}

impl fmt::Debug for Derived {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug)]
pub(crate) struct AccessorDef {
    slot: Slot,
    schema: DataSchema,
    path: Vec<String>,
}

impl AccessorDef {
    /// Functions become a call, resources and other items their name, and
    /// host literals are navigated along the field path and coerced.
    pub(crate) fn resolve(&self, ctx: &mut ResolutionCtx) -> Result<String> {
        let value = ctx.unwrap(&Wgsl::Slot(self.slot.clone()))?;
        let suffix: String = self.path.iter().map(|f| format!(".{f}")).collect();
        match &value {
            Wgsl::Literal(literal) => {
                let mut current = literal;
                for field in &self.path {
                    current = match current.get(field) {
                        Some(next) => next,
                        None => bail!(
                            "value bound to {} has no field `{field}`: {literal}",
                            self.slot
                        ),
                    };
                }
                coerce::resolve_literal(ctx, current, Some(&self.schema))
            }
            Wgsl::Item(item) if item.is_callable() => {
                Ok(format!("{}(){suffix}", ctx.resolve(&value)?))
            }
            other => Ok(format!("{}{suffix}", ctx.resolve(other)?)),
        }
    }
}

/// A typed view of a slot that can be dropped into code. Binding the slot to
/// a function emits a call; binding it to a host value emits a typed literal.
#[derive(Clone, Debug)]
pub struct Accessor {
    item: Item,
    slot: Slot,
    schema: DataSchema,
}

impl Accessor {
    pub fn new(label: Option<&str>, schema: DataSchema) -> Self {
        Self::from_slot(Slot::new(label), schema)
    }

    pub fn with_default(label: Option<&str>, schema: DataSchema, default: impl Into<Wgsl>) -> Self {
        Self::from_slot(Slot::with_default(label, default), schema)
    }

    fn from_slot(slot: Slot, schema: DataSchema) -> Self {
        Self::build(slot, schema, Vec::new())
    }

    fn build(slot: Slot, schema: DataSchema, path: Vec<String>) -> Self {
        let label = slot.label().map(|l| {
            std::iter::once(l)
                .chain(path.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(".")
        });
        let item = Item::from_kind(
            label.as_deref(),
            ItemKind::Accessor(AccessorDef {
                slot: slot.clone(),
                schema: schema.clone(),
                path,
            }),
        );
        Self { item, slot, schema }
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    pub fn schema(&self) -> &DataSchema {
        &self.schema
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    /// An accessor for `name` inside this accessor's struct value.
    pub fn field(&self, name: &str) -> Result<Accessor> {
        let DataSchema::Struct(schema) = &self.schema else {
            bail!("cannot access field `{name}` of non-struct {}", self.schema);
        };
        let Some(field_schema) = schema.field(name) else {
            bail!("struct {} has no field `{name}`", self.schema);
        };
        let ItemKind::Accessor(def) = self.item.kind() else {
            unreachable!("accessor item always wraps an accessor definition");
        };
        let mut path = def.path.clone();
        path.push(name.to_string());
        Ok(Self::build(self.slot.clone(), field_schema.clone(), path))
    }
}

impl From<Accessor> for Wgsl {
    fn from(accessor: Accessor) -> Self {
        Wgsl::Item(accessor.item)
    }
}

impl From<&Accessor> for Wgsl {
    fn from(accessor: &Accessor) -> Self {
        Wgsl::Item(accessor.item.clone())
    }
}

/// Equality for slots holding plain numbers: compares numerically so `1` and
/// `1.0` count as the same binding.
pub fn numeric_eq(a: &Wgsl, b: &Wgsl) -> bool {
    match (a, b) {
        (Wgsl::Literal(Value::Number(x)), Wgsl::Literal(Value::Number(y))) => x.as_f64() == y.as_f64(),
        _ => a.same(b),
    }
}
