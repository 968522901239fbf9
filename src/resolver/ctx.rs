//! The resolution context: one per top-level call, owning the name registry,
//! the item state stack, the memo tables and the declaration list.

use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, info, trace};

use super::{
    binding::BindingAllocator,
    coerce,
    data::{DataSchema, StructSchema},
    error::{ResolutionError, ResolveError},
    item::{Item, ItemId, Wgsl},
    name_registry::{NameRegistry, is_valid_identifier},
    slot::{Derived, Slot},
    state::ItemStateStack,
    types::{ResolveOptions, ResolvedModule},
    validation::validate_wgsl_with_context,
};

/// What kind of code is currently running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// Ordinary host logic (derived value computation).
    Normal,
    /// Shader text generation.
    Codegen,
    /// Dry-run evaluation of slot and derived values.
    Simulate,
}

/// A memoized result together with the slot values it was computed under.
struct MemoEntry<T> {
    slots: Vec<(Slot, Option<Wgsl>)>,
    result: T,
}

/// What a read of `slot` would currently yield: the innermost binding, else
/// the default. `None` only when neither exists.
fn current_slot_value(state: &mut ItemStateStack, slot: &Slot) -> Option<Wgsl> {
    state.read_slot(slot).or_else(|| slot.default_value().cloned())
}

fn slot_value_matches(slot: &Slot, current: Option<&Wgsl>, recorded: Option<&Wgsl>) -> bool {
    match (current, recorded) {
        (None, None) => true,
        (Some(a), Some(b)) => slot.are_equal(a, b),
        _ => false,
    }
}

pub struct ResolutionCtx {
    names: NameRegistry,
    state: ItemStateStack,
    modes: Vec<ExecMode>,
    memo: HashMap<ItemId, Vec<MemoEntry<String>>>,
    derived_memo: HashMap<ItemId, Vec<MemoEntry<Wgsl>>>,
    in_progress: Vec<ItemId>,
    declarations: Vec<String>,
    bindings: BindingAllocator,
}

impl ResolutionCtx {
    pub(crate) fn new(options: &ResolveOptions) -> Self {
        Self {
            names: NameRegistry::new(options.names),
            state: ItemStateStack::default(),
            modes: vec![ExecMode::Normal],
            memo: HashMap::new(),
            derived_memo: HashMap::new(),
            in_progress: Vec::new(),
            declarations: Vec::new(),
            bindings: BindingAllocator::default(),
        }
    }

    pub fn mode(&self) -> ExecMode {
        self.modes.last().copied().unwrap_or(ExecMode::Normal)
    }

    fn with_mode<T>(&mut self, mode: ExecMode, f: impl FnOnce(&mut Self) -> T) -> T {
        self.modes.push(mode);
        let result = f(self);
        self.modes.pop();
        result
    }

    /// Runs `f` in code generation mode.
    pub(crate) fn codegen<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.with_mode(ExecMode::Codegen, f)
    }

    pub fn names(&mut self) -> &mut NameRegistry {
        &mut self.names
    }

    pub(crate) fn state(&mut self) -> &mut ItemStateStack {
        &mut self.state
    }

    pub(crate) fn bindings(&mut self) -> &mut BindingAllocator {
        &mut self.bindings
    }

    /// Appends a top-level declaration. Declarations keep insertion order, so
    /// a dependency added while resolving an item precedes the item itself.
    pub fn add_declaration(&mut self, declaration: String) {
        self.declarations.push(declaration);
    }

    /// Runs `f` with `bindings` visible to every slot read it performs.
    pub fn with_slots<T>(
        &mut self,
        bindings: Vec<(Slot, Wgsl)>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.state.push_slot_bindings(bindings);
        let result = f(self);
        self.state.pop_slot_bindings();
        result
    }

    /// Reads `slot`: innermost binding, then its default.
    pub fn read_slot(&mut self, slot: &Slot) -> Result<Wgsl> {
        let value = match self.state.read_slot(slot) {
            Some(value) => value,
            None => slot
                .default_value()
                .cloned()
                .ok_or_else(|| ResolveError::MissingSlotValue {
                    slot: slot.to_string(),
                })?,
        };
        trace!(slot = %slot, value = %value, "read slot");
        Ok(value)
    }

    /// Follows slots and derived values until reaching something concrete.
    pub fn unwrap(&mut self, value: &Wgsl) -> Result<Wgsl> {
        let mut seen: Vec<ItemId> = Vec::new();
        let mut current = value.clone();
        loop {
            current = match &current {
                Wgsl::Slot(slot) => {
                    if seen.contains(&slot.id()) {
                        return Err(ResolveError::Cycle(slot.to_string()).into());
                    }
                    seen.push(slot.id());
                    self.read_slot(slot)?
                }
                Wgsl::Derived(derived) => self.compute_derived(derived)?,
                _ => return Ok(current),
            };
        }
    }

    /// Resolves `value` to WGSL text.
    pub fn resolve(&mut self, value: &Wgsl) -> Result<String> {
        if self.mode() != ExecMode::Codegen {
            return Err(ResolveError::ModeViolation("code generation", self.mode()).into());
        }
        match value {
            Wgsl::Item(item) => self.resolve_item(item),
            Wgsl::Slot(_) | Wgsl::Derived(_) => {
                let value = self.unwrap(value)?;
                self.resolve(&value)
            }
            Wgsl::Schema(schema) => self.resolve_schema(schema),
            Wgsl::Literal(literal) => coerce::resolve_literal(self, literal, None),
        }
    }

    /// Resolves `value`, coercing host literals to `schema`.
    pub fn resolve_as(&mut self, value: &Wgsl, schema: &DataSchema) -> Result<String> {
        match self.unwrap(value)? {
            Wgsl::Literal(literal) => coerce::resolve_literal(self, &literal, Some(schema)),
            other => self.resolve(&other),
        }
    }

    /// The WGSL spelling of `schema`, declaring any structs it refers to.
    pub fn resolve_schema(&mut self, schema: &DataSchema) -> Result<String> {
        if self.mode() != ExecMode::Codegen {
            return Err(ResolveError::ModeViolation("code generation", self.mode()).into());
        }
        if let Some(builtin) = schema.builtin_wgsl() {
            return Ok(builtin);
        }
        match schema {
            DataSchema::Struct(def) => {
                let def = def.clone();
                self.memoized(def.id(), &format!("struct:{}", def.label().unwrap_or("<unnamed>")), |ctx| {
                    ctx.declare_struct(&def)
                })
            }
            DataSchema::Array { elem, len } => {
                let elem = self.resolve_schema(elem)?;
                if *len == 0 {
                    Ok(format!("array<{elem}>"))
                } else {
                    Ok(format!("array<{elem}, {len}>"))
                }
            }
            other => Ok(other.to_string()),
        }
    }

    fn declare_struct(&mut self, def: &StructSchema) -> Result<String> {
        let name = self.names.make_unique(def.label(), true)?;
        let mut fields = Vec::with_capacity(def.fields().len());
        for (field, schema) in def.fields() {
            if !is_valid_identifier(field) {
                return Err(ResolveError::InvalidIdentifier(field.clone()).into());
            }
            fields.push(format!("  {field}: {},", self.resolve_schema(schema)?));
        }
        self.add_declaration(format!("struct {name} {{\n{}\n}}", fields.join("\n")));
        Ok(name)
    }

    fn resolve_item(&mut self, item: &Item) -> Result<String> {
        let item = item.clone();
        self.memoized(item.id(), &item.to_string(), |ctx| item.resolve_fresh(ctx))
    }

    /// Looks `id` up in the memo table under the current slot values, or
    /// computes it and records the slot values it read.
    fn memoized(
        &mut self,
        id: ItemId,
        label: &str,
        fresh: impl FnOnce(&mut Self) -> Result<String>,
    ) -> Result<String> {
        self.state.push_item();
        let result = self.memoized_in_layer(id, label, fresh);
        self.state.pop_item();
        result.map_err(|err| wrap_in_trace(err, label))
    }

    fn memoized_in_layer(
        &mut self,
        id: ItemId,
        label: &str,
        fresh: impl FnOnce(&mut Self) -> Result<String>,
    ) -> Result<String> {
        if let Some(entries) = self.memo.get(&id) {
            let state = &mut self.state;
            for entry in entries {
                let hit = entry.slots.iter().all(|(slot, recorded)| {
                    slot_value_matches(slot, current_slot_value(state, slot).as_ref(), recorded.as_ref())
                });
                if hit {
                    debug!(item = label, "memo hit");
                    return Ok(entry.result.clone());
                }
            }
        }

        if self.in_progress.contains(&id) {
            return Err(ResolveError::Cycle(label.to_string()).into());
        }
        debug!(item = label, "memo miss");
        self.in_progress.push(id);
        let result = fresh(self);
        self.in_progress.pop();
        let text = result?;

        let slots = self.used_slot_values();
        self.memo.entry(id).or_default().push(MemoEntry {
            slots,
            result: text.clone(),
        });
        Ok(text)
    }

    /// Current values of every slot the top item layer has read so far.
    fn used_slot_values(&mut self) -> Vec<(Slot, Option<Wgsl>)> {
        let used: Vec<Slot> = self.state.top_item_used_slots().to_vec();
        used.into_iter()
            .map(|slot| {
                let value = current_slot_value(&mut self.state, &slot);
                (slot, value)
            })
            .collect()
    }

    fn compute_derived(&mut self, derived: &Derived) -> Result<Wgsl> {
        let label = derived.to_string();
        self.state.push_item();
        let result = self.derived_in_layer(derived, &label);
        self.state.pop_item();
        result.map_err(|err| wrap_in_trace(err, &label))
    }

    fn derived_in_layer(&mut self, derived: &Derived, label: &str) -> Result<Wgsl> {
        let id = derived.id();
        if let Some(entries) = self.derived_memo.get(&id) {
            let state = &mut self.state;
            for entry in entries {
                let hit = entry.slots.iter().all(|(slot, recorded)| {
                    slot_value_matches(slot, current_slot_value(state, slot).as_ref(), recorded.as_ref())
                });
                if hit {
                    debug!(derived = label, "memo hit");
                    return Ok(entry.result.clone());
                }
            }
        }

        if self.in_progress.contains(&id) {
            return Err(ResolveError::Cycle(label.to_string()).into());
        }
        debug!(derived = label, "computing");
        self.in_progress.push(id);
        let result = self.with_mode(ExecMode::Normal, |ctx| derived.compute(ctx));
        self.in_progress.pop();
        let value = result?;

        let slots = self.used_slot_values();
        self.derived_memo.entry(id).or_default().push(MemoEntry {
            slots,
            result: value.clone(),
        });
        Ok(value)
    }

    fn finish(self, body: Option<String>, options: &ResolveOptions) -> Result<ResolvedModule> {
        let declaration_count = self.declarations.len();
        let mut code = self.declarations.join("\n\n");
        if let Some(body) = body.filter(|b| !b.trim().is_empty()) {
            if !code.is_empty() {
                code.push_str("\n\n");
            }
            code.push_str(&body);
        }

        let finished = self.bindings.finish(code)?;
        if options.validate {
            validate_wgsl_with_context(&finished.code, "resolved module")?;
        }
        info!(
            declarations = declaration_count,
            groups = finished.used_bind_group_layouts.iter().flatten().count(),
            "resolved shader module"
        );
        Ok(ResolvedModule {
            code: finished.code,
            used_bind_group_layouts: finished.used_bind_group_layouts,
            catchall: finished.catchall,
        })
    }
}

fn wrap_in_trace(err: anyhow::Error, ancestor: &str) -> anyhow::Error {
    match err.downcast::<ResolutionError>() {
        Ok(traced) => traced.prepend(ancestor).into(),
        Err(err) => ResolutionError::new(err, ancestor).into(),
    }
}

/// Resolves `root` and everything it references into a shader module. The
/// root's own text follows the collected declarations.
pub fn resolve(root: impl Into<Wgsl>, options: &ResolveOptions) -> Result<ResolvedModule> {
    resolve_program(&[], Some(&root.into()), options)
}

/// Resolves several roots into one module containing only their
/// declarations. Use this for entry points, whose resolved text is just
/// their name.
pub fn resolve_items(items: &[Wgsl], options: &ResolveOptions) -> Result<ResolvedModule> {
    resolve_program(items, None, options)
}

/// Resolves `entries` for their declarations only, then `root` (if any) as
/// the module body. Everything shares one context, so dependencies common to
/// entries and root are declared once.
pub fn resolve_program(entries: &[Wgsl], root: Option<&Wgsl>, options: &ResolveOptions) -> Result<ResolvedModule> {
    let mut ctx = ResolutionCtx::new(options);
    let body = ctx.codegen(|ctx| {
        for entry in entries {
            ctx.resolve(entry)?;
        }
        root.map(|root| ctx.resolve(root)).transpose()
    })?;
    ctx.finish(body, options)
}

/// Evaluates a slot or derived value on the host, without generating code.
pub fn evaluate(value: impl Into<Wgsl>, bindings: Vec<(Slot, Wgsl)>) -> Result<Wgsl> {
    let value = value.into();
    let mut ctx = ResolutionCtx::new(&ResolveOptions::default());
    ctx.with_mode(ExecMode::Simulate, |ctx| {
        ctx.with_slots(bindings, |ctx| ctx.unwrap(&value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{NamingPolicy, item::FnDef};

    fn strict() -> ResolveOptions {
        ResolveOptions {
            names: NamingPolicy::Strict,
            ..Default::default()
        }
    }

    #[test]
    fn shared_dependencies_are_declared_once() {
        let leaf = Item::function(FnDef::new("leaf").returns(DataSchema::f32()).body("{ return 1.0; }"));
        let a = Item::function(
            FnDef::new("a")
                .returns(DataSchema::f32())
                .body("{ return leaf(); }")
                .external("leaf", leaf.clone()),
        );
        let b = Item::function(
            FnDef::new("b")
                .returns(DataSchema::f32())
                .body("{ return leaf() * 2.0; }")
                .external("leaf", leaf),
        );
        let module = resolve_items(&[a.into(), b.into()], &strict()).unwrap();
        assert_eq!(module.code.matches("fn leaf").count(), 1);
        assert!(module.code.find("fn leaf").unwrap() < module.code.find("fn a").unwrap());
    }

    #[test]
    fn structs_are_declared_before_use() {
        let particle = StructSchema::new(
            Some("Particle"),
            vec![("pos".into(), DataSchema::vec2f()), ("vel".into(), DataSchema::vec2f())],
        );
        let f = Item::function(
            FnDef::new("advance")
                .arg("p", DataSchema::Struct(particle.clone()))
                .returns(DataSchema::Struct(particle))
                .body("{ return p; }"),
        );
        let module = resolve_items(&[f.into()], &strict()).unwrap();
        assert_eq!(
            module.code,
            "struct Particle {\n  pos: vec2f,\n  vel: vec2f,\n}\n\nfn advance(p: Particle) -> Particle { return p; }"
        );
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let slot = Slot::new(Some("self"));
        let f = Item::function(
            FnDef::new("loopy")
                .body("{ again(); }")
                .external("again", slot.clone()),
        );
        let bound = f.with(&slot, f.clone());
        let err = resolve(bound, &strict()).unwrap_err();
        let err = err.downcast::<ResolutionError>().unwrap();
        assert!(matches!(err.kind(), Some(ResolveError::Cycle(_))), "{err}");
        assert_eq!(err.trace(), ["bound:loopy", "fn:loopy", "fn:loopy"]);
    }

    #[test]
    fn resolving_outside_codegen_mode_fails() {
        let mut ctx = ResolutionCtx::new(&strict());
        let err = ctx.resolve(&Wgsl::literal(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolveError>(),
            Some(ResolveError::ModeViolation(_, ExecMode::Normal))
        ));
    }

    #[test]
    fn empty_root_text_is_dropped() {
        let decl = Item::declare("const LIMIT = 4;", vec![]);
        let module = resolve(decl, &strict()).unwrap();
        assert_eq!(module.code, "const LIMIT = 4;");
    }
}
