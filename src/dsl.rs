//! JSON shader-graph documents: loading, building into resolver items and
//! resolving.
//!
//! Every entity has a string `id`. Items reference each other (and slots,
//! resources and layout entries) through externals; references may point
//! forward, and cycles between items are rejected while building.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    rc::Rc,
};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resolver::{
    Access, Accessor, BindGroupLayout, Buffer, DataSchema, FnDef, FnStage, Item, JsonTreeTranspiler,
    LayoutEntry, ResolveOptions, ResolvedModule, SampleType, Sampler, Slot, StructSchema, TexelFormat,
    Texture, TextureDimension, Wgsl, resolve_program,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ShaderGraph {
    pub version: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub options: Option<ResolveOptions>,
    #[serde(default)]
    pub slots: Vec<SlotDecl>,
    #[serde(default)]
    pub structs: Vec<StructDecl>,
    #[serde(default)]
    pub layouts: Vec<LayoutDecl>,
    #[serde(default)]
    pub buffers: Vec<BufferDecl>,
    #[serde(default)]
    pub textures: Vec<TextureDecl>,
    #[serde(default)]
    pub samplers: Vec<SamplerDecl>,
    #[serde(default)]
    pub items: Vec<ItemDecl>,
    /// Resolved as code preceded by its declarations.
    #[serde(default)]
    pub root: Option<String>,
    /// Resolved into declarations only (entry points).
    #[serde(default)]
    pub roots: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SlotDecl {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub default: Option<ExternalRef>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StructDecl {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub fields: Vec<FieldDecl>,
}

fn default_read() -> Access {
    Access::Read
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LayoutEntryDecl {
    Empty {
        key: String,
    },
    Uniform {
        key: String,
        #[serde(rename = "type")]
        ty: String,
    },
    Storage {
        key: String,
        #[serde(rename = "type")]
        ty: String,
        #[serde(default = "default_read")]
        access: Access,
    },
    Sampler {
        key: String,
        #[serde(default)]
        comparison: bool,
    },
    #[serde(rename_all = "camelCase")]
    Texture {
        key: String,
        #[serde(default = "default_sample_type")]
        sample_type: SampleType,
        #[serde(default)]
        dimension: TextureDimension,
        #[serde(default)]
        multisampled: bool,
    },
    StorageTexture {
        key: String,
        format: TexelFormat,
        access: Access,
        #[serde(default)]
        dimension: TextureDimension,
    },
    ExternalTexture {
        key: String,
    },
}

fn default_sample_type() -> SampleType {
    SampleType::Float
}

impl LayoutEntryDecl {
    fn key(&self) -> &str {
        match self {
            LayoutEntryDecl::Empty { key }
            | LayoutEntryDecl::Uniform { key, .. }
            | LayoutEntryDecl::Storage { key, .. }
            | LayoutEntryDecl::Sampler { key, .. }
            | LayoutEntryDecl::Texture { key, .. }
            | LayoutEntryDecl::StorageTexture { key, .. }
            | LayoutEntryDecl::ExternalTexture { key } => key,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LayoutDecl {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Pins the layout to this group index.
    #[serde(default)]
    pub group: Option<u32>,
    pub entries: Vec<LayoutEntryDecl>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BufferDecl {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub ty: String,
}

fn default_sample_count() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TextureDecl {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub format: TexelFormat,
    #[serde(default)]
    pub dimension: TextureDimension,
    #[serde(default = "default_sample_count")]
    pub sample_count: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SamplerDecl {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub comparison: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageDecl {
    #[default]
    Plain,
    Compute,
    Vertex,
    Fragment,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArgDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub attribute: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReturnDecl {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub attribute: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BufferUsage {
    Uniform,
    Readonly,
    Mutable,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextureView {
    #[default]
    Sampled,
    Storage,
}

/// A reference from an item to something it uses.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum ExternalRef {
    /// Another item, an accessor or a struct.
    Ref {
        #[serde(rename = "ref")]
        id: String,
    },
    Slot {
        slot: String,
    },
    Buffer {
        buffer: String,
        usage: BufferUsage,
    },
    Texture {
        texture: String,
        #[serde(default)]
        view: TextureView,
        #[serde(default)]
        access: Option<Access>,
    },
    Sampler {
        sampler: String,
    },
    Layout {
        layout: String,
        key: String,
    },
    Value {
        value: Value,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ItemDecl {
    #[serde(rename_all = "camelCase")]
    Fn {
        id: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        stage: StageDecl,
        #[serde(default)]
        workgroup_size: Option<[u32; 3]>,
        #[serde(default)]
        args: Vec<ArgDecl>,
        #[serde(default)]
        returns: Option<ReturnDecl>,
        /// A raw WGSL block.
        #[serde(default)]
        body: Option<String>,
        /// A statement tree: `{"params": [...], "body": [...]}`.
        #[serde(default)]
        tree: Option<Value>,
        #[serde(default)]
        externals: BTreeMap<String, ExternalRef>,
    },
    Const {
        id: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(rename = "type")]
        ty: String,
        value: ExternalRef,
    },
    Code {
        id: String,
        text: String,
        #[serde(default)]
        externals: BTreeMap<String, ExternalRef>,
    },
    Declare {
        id: String,
        text: String,
        #[serde(default)]
        externals: BTreeMap<String, ExternalRef>,
    },
    /// `item` with slots (or accessors, by id) bound to values.
    Bound {
        id: String,
        item: String,
        bindings: BTreeMap<String, ExternalRef>,
    },
    Accessor {
        id: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(rename = "type")]
        ty: String,
        #[serde(default)]
        default: Option<ExternalRef>,
    },
}

impl ItemDecl {
    pub fn id(&self) -> &str {
        match self {
            ItemDecl::Fn { id, .. }
            | ItemDecl::Const { id, .. }
            | ItemDecl::Code { id, .. }
            | ItemDecl::Declare { id, .. }
            | ItemDecl::Bound { id, .. }
            | ItemDecl::Accessor { id, .. } => id,
        }
    }
}

pub fn load_graph_from_path(path: impl AsRef<std::path::Path>) -> Result<ShaderGraph> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read shader graph json at {}", path.display()))?;
    parse_graph(&text)
}

pub fn parse_graph(text: &str) -> Result<ShaderGraph> {
    serde_json::from_str(text).context("failed to parse shader graph json")
}

/// The resolver objects built from a [`ShaderGraph`], keyed by id.
pub struct BuiltGraph {
    pub items: HashMap<String, Item>,
    pub slots: HashMap<String, Slot>,
    pub layouts: HashMap<String, BindGroupLayout>,
    pub root: Option<Wgsl>,
    pub roots: Vec<Wgsl>,
}

struct GraphBuilder<'a> {
    graph: &'a ShaderGraph,
    item_decls: HashMap<&'a str, &'a ItemDecl>,
    structs: HashMap<String, StructSchema>,
    slots: HashMap<String, Slot>,
    accessors: HashMap<String, Accessor>,
    layouts: HashMap<String, BindGroupLayout>,
    buffers: HashMap<String, Buffer>,
    textures: HashMap<String, Texture>,
    samplers: HashMap<String, Sampler>,
    items: HashMap<String, Item>,
    building: Vec<String>,
}

impl<'a> GraphBuilder<'a> {
    fn new(graph: &'a ShaderGraph) -> Result<Self> {
        let mut seen: HashSet<&str> = HashSet::new();
        let ids = graph
            .slots
            .iter()
            .map(|s| s.id.as_str())
            .chain(graph.structs.iter().map(|s| s.id.as_str()))
            .chain(graph.items.iter().map(ItemDecl::id));
        for id in ids {
            if !seen.insert(id) {
                bail!("duplicate id `{id}` in shader graph");
            }
        }

        Ok(Self {
            graph,
            item_decls: graph.items.iter().map(|i| (i.id(), i)).collect(),
            structs: HashMap::new(),
            slots: HashMap::new(),
            accessors: HashMap::new(),
            layouts: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            items: HashMap::new(),
            building: Vec::new(),
        })
    }

    fn schema(&self, ty: &str) -> Result<DataSchema> {
        DataSchema::parse(ty, &|name| self.structs.get(name).cloned())
    }

    /// Structs may only refer to structs declared before them.
    fn build_structs(&mut self) -> Result<()> {
        let graph = self.graph;
        for decl in &graph.structs {
            let mut fields = Vec::with_capacity(decl.fields.len());
            for field in &decl.fields {
                let schema = self
                    .schema(&field.ty)
                    .with_context(|| format!("in field `{}` of struct `{}`", field.name, decl.id))?;
                fields.push((field.name.clone(), schema));
            }
            let label = decl.label.as_deref().unwrap_or(&decl.id);
            self.structs
                .insert(decl.id.clone(), StructSchema::new(Some(label), fields));
        }
        Ok(())
    }

    fn build_resources(&mut self) -> Result<()> {
        let graph = self.graph;
        for decl in &graph.buffers {
            let schema = self
                .schema(&decl.ty)
                .with_context(|| format!("in buffer `{}`", decl.id))?;
            let label = decl.label.as_deref().unwrap_or(&decl.id);
            self.buffers.insert(decl.id.clone(), Buffer::new(Some(label), schema));
        }
        for decl in &graph.textures {
            let label = decl.label.as_deref().unwrap_or(&decl.id);
            self.textures.insert(
                decl.id.clone(),
                Texture::with_sample_count(Some(label), decl.format, decl.dimension, decl.sample_count),
            );
        }
        for decl in &graph.samplers {
            let label = decl.label.as_deref().unwrap_or(&decl.id);
            let sampler = if decl.comparison {
                Sampler::comparison(Some(label))
            } else {
                Sampler::new(Some(label))
            };
            self.samplers.insert(decl.id.clone(), sampler);
        }
        for decl in &graph.layouts {
            let mut entries = Vec::with_capacity(decl.entries.len());
            for entry in &decl.entries {
                let built = self
                    .layout_entry(entry)
                    .with_context(|| format!("in entry `{}` of layout `{}`", entry.key(), decl.id))?;
                entries.push((entry.key().to_string(), built));
            }
            let label = decl.label.as_deref().unwrap_or(&decl.id);
            let layout = match decl.group {
                Some(group) => BindGroupLayout::with_group(Some(label), group, entries),
                None => BindGroupLayout::new(Some(label), entries),
            };
            self.layouts.insert(decl.id.clone(), layout);
        }
        Ok(())
    }

    fn layout_entry(&self, entry: &LayoutEntryDecl) -> Result<Option<LayoutEntry>> {
        Ok(Some(match entry {
            LayoutEntryDecl::Empty { .. } => return Ok(None),
            LayoutEntryDecl::Uniform { ty, .. } => LayoutEntry::Uniform {
                schema: self.schema(ty)?,
            },
            LayoutEntryDecl::Storage { ty, access, .. } => LayoutEntry::Storage {
                schema: self.schema(ty)?,
                access: *access,
            },
            LayoutEntryDecl::Sampler { comparison, .. } => LayoutEntry::Sampler {
                comparison: *comparison,
            },
            LayoutEntryDecl::Texture {
                sample_type,
                dimension,
                multisampled,
                ..
            } => LayoutEntry::Texture {
                sample_type: *sample_type,
                dimension: *dimension,
                multisampled: *multisampled,
            },
            LayoutEntryDecl::StorageTexture {
                format,
                access,
                dimension,
                ..
            } => LayoutEntry::StorageTexture {
                format: *format,
                access: *access,
                dimension: *dimension,
            },
            LayoutEntryDecl::ExternalTexture { .. } => LayoutEntry::ExternalTexture,
        }))
    }

    fn slot(&mut self, id: &str) -> Result<Slot> {
        if let Some(slot) = self.slots.get(id) {
            return Ok(slot.clone());
        }
        if let Some(accessor) = self.accessor(id)? {
            return Ok(accessor.slot().clone());
        }
        let graph = self.graph;
        let Some(decl) = graph.slots.iter().find(|s| s.id == id) else {
            bail!("unknown slot `{id}`");
        };
        let default = match &decl.default {
            Some(default) => Some(self.external(default)?),
            None => None,
        };
        let label = decl.label.as_deref().unwrap_or(&decl.id);
        let slot = match default {
            Some(default) => Slot::with_default(Some(label), default),
            None => Slot::new(Some(label)),
        };
        self.slots.insert(id.to_string(), slot.clone());
        Ok(slot)
    }

    /// The accessor declared as item `id`, if that item is an accessor.
    fn accessor(&mut self, id: &str) -> Result<Option<Accessor>> {
        if let Some(accessor) = self.accessors.get(id) {
            return Ok(Some(accessor.clone()));
        }
        if !matches!(self.item_decls.get(id), Some(ItemDecl::Accessor { .. })) {
            return Ok(None);
        }
        self.item(id)?;
        Ok(self.accessors.get(id).cloned())
    }

    fn external(&mut self, external: &ExternalRef) -> Result<Wgsl> {
        Ok(match external {
            ExternalRef::Ref { id } => {
                if self.item_decls.contains_key(id.as_str()) {
                    self.item(id)?.into()
                } else if let Some(schema) = self.structs.get(id) {
                    schema.clone().into()
                } else {
                    bail!("unknown reference `{id}`");
                }
            }
            ExternalRef::Slot { slot } => self.slot(slot)?.into(),
            ExternalRef::Buffer { buffer, usage } => {
                let buffer = self
                    .buffers
                    .get(buffer)
                    .ok_or_else(|| anyhow!("unknown buffer `{buffer}`"))?;
                let item = match usage {
                    BufferUsage::Uniform => buffer.uniform(),
                    BufferUsage::Readonly => buffer.readonly(),
                    BufferUsage::Mutable => buffer.mutable(),
                };
                item.into()
            }
            ExternalRef::Texture { texture, view, access } => {
                let texture = self
                    .textures
                    .get(texture)
                    .ok_or_else(|| anyhow!("unknown texture `{texture}`"))?;
                let item = match view {
                    TextureView::Sampled => texture.sampled(),
                    TextureView::Storage => texture.storage(access.unwrap_or(Access::Write)),
                };
                item.into()
            }
            ExternalRef::Sampler { sampler } => self
                .samplers
                .get(sampler)
                .ok_or_else(|| anyhow!("unknown sampler `{sampler}`"))?
                .binding()
                .into(),
            ExternalRef::Layout { layout, key } => self
                .layouts
                .get(layout)
                .ok_or_else(|| anyhow!("unknown layout `{layout}`"))?
                .bound(key)?
                .into(),
            ExternalRef::Value { value } => Wgsl::Literal(value.clone()),
        })
    }

    fn externals(&mut self, externals: &BTreeMap<String, ExternalRef>) -> Result<Vec<(String, Wgsl)>> {
        let mut built = Vec::with_capacity(externals.len());
        for (name, external) in externals {
            let value = self
                .external(external)
                .with_context(|| format!("in external `{name}`"))?;
            built.push((name.clone(), value));
        }
        Ok(built)
    }

    fn item(&mut self, id: &str) -> Result<Item> {
        if let Some(item) = self.items.get(id) {
            return Ok(item.clone());
        }
        if self.building.iter().any(|b| b == id) {
            bail!(
                "cycle detected in shader graph: {} -> {id}",
                self.building.join(" -> ")
            );
        }
        let Some(decl) = self.item_decls.get(id).copied() else {
            bail!("unknown item `{id}`");
        };

        self.building.push(id.to_string());
        let built = self.build_item(decl);
        self.building.pop();

        let item = built.with_context(|| format!("failed to build item `{id}`"))?;
        self.items.insert(id.to_string(), item.clone());
        Ok(item)
    }

    fn build_item(&mut self, decl: &ItemDecl) -> Result<Item> {
        match decl {
            ItemDecl::Fn {
                id,
                label,
                stage,
                workgroup_size,
                args,
                returns,
                body,
                tree,
                externals,
            } => {
                let mut def = FnDef::new(label.as_deref().unwrap_or(id)).stage(match stage {
                    StageDecl::Plain => FnStage::Plain,
                    StageDecl::Compute => FnStage::Compute {
                        workgroup_size: workgroup_size.unwrap_or([1, 1, 1]),
                    },
                    StageDecl::Vertex => FnStage::Vertex,
                    StageDecl::Fragment => FnStage::Fragment,
                });
                for arg in args {
                    let schema = self.schema(&arg.ty)?;
                    def = match &arg.attribute {
                        Some(attr) => def.arg_with_attribute(&arg.name, schema, attr),
                        None => def.arg(&arg.name, schema),
                    };
                }
                if let Some(ret) = returns {
                    let schema = self.schema(&ret.ty)?;
                    def = match &ret.attribute {
                        Some(attr) => def.returns_with_attribute(schema, attr),
                        None => def.returns(schema),
                    };
                }
                def = match (body, tree) {
                    (Some(body), None) => def.body(body),
                    (None, Some(tree)) => def.source(&tree.to_string(), Rc::new(JsonTreeTranspiler)),
                    _ => bail!("function `{id}` needs exactly one of `body` or `tree`"),
                };
                def.externals = self.externals(externals)?;
                Ok(Item::function(def))
            }
            ItemDecl::Const { id, label, ty, value } => {
                let schema = self.schema(ty)?;
                let value = self.external(value)?;
                Ok(Item::constant(label.as_deref().unwrap_or(id), schema, value))
            }
            ItemDecl::Code { text, externals, .. } => Ok(Item::code(text, self.externals(externals)?)),
            ItemDecl::Declare { text, externals, .. } => Ok(Item::declare(text, self.externals(externals)?)),
            ItemDecl::Bound { item, bindings, .. } => {
                let inner = self.item(item)?;
                let mut built = Vec::with_capacity(bindings.len());
                for (slot_id, value) in bindings {
                    let slot = self.slot(slot_id)?;
                    let value = self
                        .external(value)
                        .with_context(|| format!("in binding for slot `{slot_id}`"))?;
                    built.push((slot, value));
                }
                Ok(inner.with_slots(built))
            }
            ItemDecl::Accessor {
                id,
                label,
                ty,
                default,
            } => {
                let schema = self.schema(ty)?;
                let label = label.as_deref().unwrap_or(id);
                let accessor = match default {
                    Some(default) => {
                        let default = self.external(default)?;
                        Accessor::with_default(Some(label), schema, default)
                    }
                    None => Accessor::new(Some(label), schema),
                };
                self.accessors.insert(id.clone(), accessor.clone());
                Ok(accessor.item().clone())
            }
        }
    }
}

/// Builds every entity of `graph`. Items are built on first reference, so
/// declaration order does not matter; reference cycles are errors.
pub fn build_graph(graph: &ShaderGraph) -> Result<BuiltGraph> {
    let mut builder = GraphBuilder::new(graph)?;
    builder.build_structs()?;
    builder.build_resources()?;
    for decl in &graph.slots {
        builder.slot(&decl.id)?;
    }
    for decl in &graph.items {
        builder.item(decl.id())?;
    }

    let root = match &graph.root {
        Some(id) => Some(builder.item(id)?.into()),
        None => None,
    };
    let mut roots = Vec::with_capacity(graph.roots.len());
    for id in &graph.roots {
        roots.push(builder.item(id)?.into());
    }
    if root.is_none() && roots.is_empty() {
        bail!("shader graph needs a `root` or at least one entry in `roots`");
    }

    Ok(BuiltGraph {
        items: builder.items,
        slots: builder.slots,
        layouts: builder.layouts,
        root,
        roots,
    })
}

/// Builds and resolves `graph`. The `roots` contribute declarations only;
/// the `root`, if any, supplies the module body.
pub fn resolve_graph(graph: &ShaderGraph, options: &ResolveOptions) -> Result<ResolvedModule> {
    let built = build_graph(graph)?;
    resolve_program(&built.roots, built.root.as_ref(), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NamingPolicy;

    fn strict() -> ResolveOptions {
        ResolveOptions {
            names: NamingPolicy::Strict,
            ..Default::default()
        }
    }

    fn resolve_json(json: &str) -> Result<ResolvedModule> {
        resolve_graph(&parse_graph(json)?, &strict())
    }

    #[test]
    fn bound_items_specialize_a_shared_function() {
        let module = resolve_json(
            r#"{
                "version": "1.0",
                "slots": [{ "id": "scale", "default": { "value": 2 } }],
                "items": [
                    { "kind": "bound", "id": "tripled", "item": "scaled",
                      "bindings": { "scale": { "value": 3 } } },
                    { "kind": "fn", "id": "scaled",
                      "args": [{ "name": "x", "type": "f32" }],
                      "returns": { "type": "f32" },
                      "body": "{ return x * scale; }",
                      "externals": { "scale": { "slot": "scale" } } }
                ],
                "roots": ["scaled", "tripled"]
            }"#,
        )
        .unwrap();
        assert_eq!(module.code.matches("fn scaled").count(), 2);
        assert!(module.code.contains("fn scaled(x: f32) -> f32"));
        assert!(module.code.contains("fn scaled_1(x: f32) -> f32"));
        assert!(module.code.contains("return x * 3"));
    }

    #[test]
    fn tree_bodies_go_through_the_transpiler() {
        let module = resolve_json(
            r#"{
                "version": "1.0",
                "items": [{
                    "kind": "fn", "id": "double",
                    "args": [{ "name": "x", "type": "f32" }],
                    "returns": { "type": "f32" },
                    "tree": {
                        "params": ["x"],
                        "body": [{ "kind": "return", "value": {
                            "kind": "binary", "op": "*",
                            "lhs": { "kind": "ident", "name": "x" },
                            "rhs": { "kind": "lit", "value": 2 }
                        } }]
                    }
                }],
                "roots": ["double"]
            }"#,
        )
        .unwrap();
        assert!(module.code.starts_with("fn double(x: f32) -> f32 {\n"));
        assert!(module.code.contains("return x * 2"));
    }

    #[test]
    fn root_text_follows_declarations() {
        let module = resolve_json(
            r#"{
                "version": "1.0",
                "structs": [{ "id": "Particle", "fields": [
                    { "name": "position", "type": "vec3f" },
                    { "name": "life", "type": "f32" }
                ] }],
                "buffers": [{ "id": "particles", "type": "array<Particle>" }],
                "items": [{ "kind": "code", "id": "main",
                    "text": "let p = particles[0];",
                    "externals": { "particles": { "buffer": "particles", "usage": "readonly" } } }],
                "root": "main"
            }"#,
        )
        .unwrap();
        assert!(module.code.starts_with("struct Particle {\n"));
        assert!(module.code.contains("@group(0) @binding(0) var<storage, read> particles: array<Particle>;"));
        assert!(module.code.ends_with("let p = particles[0];"));
        assert!(module.catchall.is_some());
    }

    #[test]
    fn cycles_between_items_are_rejected() {
        let err = resolve_json(
            r#"{
                "version": "1.0",
                "items": [
                    { "kind": "code", "id": "a", "text": "b", "externals": { "b": { "ref": "b" } } },
                    { "kind": "code", "id": "b", "text": "a", "externals": { "a": { "ref": "a" } } }
                ],
                "root": "a"
            }"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("cycle detected in shader graph: a -> b -> a"));
    }

    #[test]
    fn graph_errors_name_the_offending_entity() {
        let err = resolve_json(
            r#"{ "version": "1.0",
                 "items": [{ "kind": "code", "id": "a", "text": "x", "externals": { "x": { "ref": "nope" } } }],
                 "root": "a" }"#,
        )
        .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("failed to build item `a`"));
        assert!(msg.contains("unknown reference `nope`"));

        let err = resolve_json(
            r#"{ "version": "1.0",
                 "slots": [{ "id": "a" }],
                 "items": [{ "kind": "code", "id": "a", "text": "" }],
                 "root": "a" }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate id `a`"));

        let err = resolve_json(r#"{ "version": "1.0" }"#).unwrap_err();
        assert!(err.to_string().contains("needs a `root`"));
    }

    #[test]
    fn functions_need_exactly_one_body() {
        let err = resolve_json(
            r#"{ "version": "1.0",
                 "items": [{ "kind": "fn", "id": "f" }],
                 "roots": ["f"] }"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("needs exactly one of `body` or `tree`"));
    }

    #[test]
    fn accessors_bind_by_item_id() {
        let module = resolve_json(
            r#"{
                "version": "1.0",
                "items": [
                    { "kind": "accessor", "id": "size", "type": "u32" },
                    { "kind": "fn", "id": "count", "returns": { "type": "u32" },
                      "body": "{ return size; }", "externals": { "size": { "ref": "size" } } },
                    { "kind": "bound", "id": "count4", "item": "count",
                      "bindings": { "size": { "value": 4 } } }
                ],
                "roots": ["count4"]
            }"#,
        )
        .unwrap();
        assert!(module.code.contains("return 4u;"));
    }
}
