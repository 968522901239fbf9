//! The stack of item, slot binding and lexical scope layers that is active
//! while a resolution is in progress.

use std::collections::HashMap;

use super::{data::DataSchema, item::Wgsl, slot::Slot};

/// Lexical information about the function whose body is being generated.
#[derive(Debug, Default)]
pub(crate) struct FunctionScope {
    /// Host parameter name to emitted WGSL name, in declaration order.
    pub args: Vec<(String, String)>,
    pub externals: Vec<(String, Wgsl)>,
    pub returns: Option<DataSchema>,
}

#[derive(Debug)]
enum Layer {
    Item { used_slots: Vec<Slot> },
    SlotBinding(Vec<(Slot, Wgsl)>),
    FunctionScope(FunctionScope),
    /// Host name to emitted name for the locals declared in a block.
    BlockScope(HashMap<String, String>),
}

/// What an identifier in a function body refers to.
#[derive(Debug, Clone)]
pub(crate) enum Identifier {
    Local(String),
    Arg(String),
    External(Wgsl),
}

#[derive(Debug, Default)]
pub(crate) struct ItemStateStack {
    layers: Vec<Layer>,
}

impl ItemStateStack {
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn push_item(&mut self) {
        self.layers.push(Layer::Item {
            used_slots: Vec::new(),
        });
    }

    /// Slots read so far by the item on top of the stack.
    pub fn top_item_used_slots(&self) -> &[Slot] {
        match self.layers.last() {
            Some(Layer::Item { used_slots }) => used_slots,
            _ => panic!("expected item layer to be on top"),
        }
    }

    pub fn pop_item(&mut self) {
        match self.layers.pop() {
            Some(Layer::Item { .. }) => {}
            _ => panic!("expected item layer to be on top"),
        }
    }

    pub fn push_slot_bindings(&mut self, bindings: Vec<(Slot, Wgsl)>) {
        self.layers.push(Layer::SlotBinding(bindings));
    }

    pub fn pop_slot_bindings(&mut self) {
        match self.layers.pop() {
            Some(Layer::SlotBinding(_)) => {}
            _ => panic!("expected slot binding layer to be on top"),
        }
    }

    pub fn push_function_scope(&mut self, scope: FunctionScope) {
        self.layers.push(Layer::FunctionScope(scope));
    }

    pub fn pop_function_scope(&mut self) {
        match self.layers.pop() {
            Some(Layer::FunctionScope(_)) => {}
            _ => panic!("expected function scope layer to be on top"),
        }
    }

    pub fn push_block_scope(&mut self) {
        self.layers.push(Layer::BlockScope(HashMap::new()));
    }

    pub fn pop_block_scope(&mut self) {
        match self.layers.pop() {
            Some(Layer::BlockScope(_)) => {}
            _ => panic!("expected block scope layer to be on top"),
        }
    }

    pub fn define_local(&mut self, name: &str, emitted: &str) {
        match self.layers.last_mut() {
            Some(Layer::BlockScope(locals)) => {
                locals.insert(name.to_string(), emitted.to_string());
            }
            _ => panic!("expected block scope layer to be on top"),
        }
    }

    /// Return type of the innermost function being generated.
    pub fn function_return(&self) -> Option<&DataSchema> {
        self.layers.iter().rev().find_map(|layer| match layer {
            Layer::FunctionScope(scope) => Some(scope.returns.as_ref()),
            _ => None,
        })
        .flatten()
    }

    /// Looks up `name` from the innermost block outwards, stopping at the
    /// nearest function scope (args, then externals).
    pub fn lookup(&self, name: &str) -> Option<Identifier> {
        for layer in self.layers.iter().rev() {
            match layer {
                Layer::BlockScope(locals) => {
                    if let Some(emitted) = locals.get(name) {
                        return Some(Identifier::Local(emitted.clone()));
                    }
                }
                Layer::FunctionScope(scope) => {
                    if let Some((_, emitted)) = scope.args.iter().find(|(host, _)| host == name) {
                        return Some(Identifier::Arg(emitted.clone()));
                    }
                    return scope
                        .externals
                        .iter()
                        .find(|(ext, _)| ext == name)
                        .map(|(_, value)| Identifier::External(value.clone()));
                }
                Layer::Item { .. } | Layer::SlotBinding(_) => {}
            }
        }
        None
    }

    /// Returns the innermost binding of `slot`, if any.
    ///
    /// The slot is recorded as used by every item layer above the binding
    /// layer that supplied the value (or by every item layer when the slot is
    /// unbound), since each of those items depends on it.
    pub fn read_slot(&mut self, slot: &Slot) -> Option<Wgsl> {
        let mut found = None;
        let mut boundary = 0;
        for (i, layer) in self.layers.iter().enumerate().rev() {
            if let Layer::SlotBinding(bindings) = layer {
                if let Some((_, value)) = bindings.iter().find(|(s, _)| s.ptr_eq(slot)) {
                    found = Some(value.clone());
                    boundary = i + 1;
                    break;
                }
            }
        }

        for layer in &mut self.layers[boundary..] {
            if let Layer::Item { used_slots } = layer {
                if !used_slots.iter().any(|s| s.ptr_eq(slot)) {
                    used_slots.push(slot.clone());
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_reads_are_recorded_above_the_binding() {
        let slot = Slot::new(Some("s"));
        let mut stack = ItemStateStack::default();
        stack.push_item();
        stack.push_slot_bindings(vec![(slot.clone(), Wgsl::literal(1))]);
        stack.push_item();

        let value = stack.read_slot(&slot);
        assert!(value.unwrap().same(&Wgsl::literal(1)));
        assert_eq!(stack.top_item_used_slots().len(), 1);

        stack.pop_item();
        stack.pop_slot_bindings();
        assert!(stack.top_item_used_slots().is_empty());
    }

    #[test]
    fn unbound_reads_are_recorded_everywhere() {
        let slot = Slot::new(Some("s"));
        let mut stack = ItemStateStack::default();
        stack.push_item();
        stack.push_item();
        assert!(stack.read_slot(&slot).is_none());
        stack.pop_item();
        assert_eq!(stack.top_item_used_slots().len(), 1);
    }

    #[test]
    fn innermost_binding_wins() {
        let slot = Slot::new(None);
        let mut stack = ItemStateStack::default();
        stack.push_slot_bindings(vec![(slot.clone(), Wgsl::literal(1))]);
        stack.push_slot_bindings(vec![(slot.clone(), Wgsl::literal(2))]);
        assert!(stack.read_slot(&slot).unwrap().same(&Wgsl::literal(2)));
    }

    #[test]
    fn lookup_stops_at_function_scope() {
        let mut stack = ItemStateStack::default();
        stack.push_function_scope(FunctionScope::default());
        stack.push_block_scope();
        stack.define_local("outer", "outer");
        stack.push_function_scope(FunctionScope {
            args: vec![("a".into(), "a_1".into())],
            externals: vec![("k".into(), Wgsl::literal(3))],
            returns: None,
        });
        stack.push_block_scope();
        stack.define_local("x", "x");

        assert!(matches!(stack.lookup("x"), Some(Identifier::Local(n)) if n == "x"));
        assert!(matches!(stack.lookup("a"), Some(Identifier::Arg(n)) if n == "a_1"));
        assert!(matches!(stack.lookup("k"), Some(Identifier::External(_))));
        assert!(stack.lookup("outer").is_none());

        stack.pop_block_scope();
        stack.pop_function_scope();
        assert!(stack.lookup("outer").is_some());
    }

    #[test]
    #[should_panic(expected = "expected item layer to be on top")]
    fn popping_the_wrong_layer_panics() {
        let mut stack = ItemStateStack::default();
        stack.push_block_scope();
        stack.pop_item();
    }
}
