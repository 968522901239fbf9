//! GPU resources, bind group layouts and the allocator that turns them into
//! `@group(..) @binding(..)` declarations.
//!
//! Resources referenced directly (without a layout) share one automatically
//! created "catch-all" group. Layout groups without an explicit index get the
//! lowest free indices in first-use order after the catch-all group has taken
//! its own. Group numbers are only known once the whole module is resolved,
//! so declarations carry placeholders that [`BindingAllocator::finish`]
//! replaces.

use std::{collections::HashMap, fmt, rc::Rc};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ctx::ResolutionCtx,
    data::DataSchema,
    error::ResolveError,
    item::{Item, ItemId, ItemKind},
};

pub(crate) const CATCHALL_MARKER: &str = "#CATCHALL#";
const LAYOUT_MARKER_PREFIX: &str = "#BIND_GROUP_LAYOUT_";
/// Highest group count any backend exposes; pinned indices must stay below it.
pub const MAX_BIND_GROUPS: u32 = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn wgsl(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::ReadWrite => "read_write",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleType {
    Float,
    UnfilterableFloat,
    Depth,
    Sint,
    Uint,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureDimension {
    #[serde(rename = "1d")]
    D1,
    #[default]
    #[serde(rename = "2d")]
    D2,
    #[serde(rename = "2d-array")]
    D2Array,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "cube")]
    Cube,
    #[serde(rename = "cube-array")]
    CubeArray,
}

impl TextureDimension {
    fn suffix(self) -> &'static str {
        match self {
            TextureDimension::D1 => "1d",
            TextureDimension::D2 => "2d",
            TextureDimension::D2Array => "2d_array",
            TextureDimension::D3 => "3d",
            TextureDimension::Cube => "cube",
            TextureDimension::CubeArray => "cube_array",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TexelFormat {
    Rgba8Unorm,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    R32Uint,
    R32Sint,
    Rg32Float,
    Depth32Float,
}

impl TexelFormat {
    pub fn wgsl(self) -> &'static str {
        match self {
            TexelFormat::Rgba8Unorm => "rgba8unorm",
            TexelFormat::Rgba8Snorm => "rgba8snorm",
            TexelFormat::Rgba8Uint => "rgba8uint",
            TexelFormat::Rgba8Sint => "rgba8sint",
            TexelFormat::Bgra8Unorm => "bgra8unorm",
            TexelFormat::Rgba16Float => "rgba16float",
            TexelFormat::Rgba32Float => "rgba32float",
            TexelFormat::R32Float => "r32float",
            TexelFormat::R32Uint => "r32uint",
            TexelFormat::R32Sint => "r32sint",
            TexelFormat::Rg32Float => "rg32float",
            TexelFormat::Depth32Float => "depth32float",
        }
    }

    pub fn sample_type(self) -> SampleType {
        match self {
            TexelFormat::Rgba8Uint | TexelFormat::R32Uint => SampleType::Uint,
            TexelFormat::Rgba8Sint | TexelFormat::R32Sint => SampleType::Sint,
            TexelFormat::Rgba32Float | TexelFormat::R32Float | TexelFormat::Rg32Float => {
                SampleType::UnfilterableFloat
            }
            TexelFormat::Depth32Float => SampleType::Depth,
            _ => SampleType::Float,
        }
    }
}

/// The shape of a single binding in a bind group layout.
#[derive(Clone, Debug)]
pub enum LayoutEntry {
    Uniform {
        schema: DataSchema,
    },
    Storage {
        schema: DataSchema,
        access: Access,
    },
    Sampler {
        comparison: bool,
    },
    Texture {
        sample_type: SampleType,
        dimension: TextureDimension,
        multisampled: bool,
    },
    StorageTexture {
        format: TexelFormat,
        access: Access,
        dimension: TextureDimension,
    },
    ExternalTexture,
}

impl LayoutEntry {
    /// Distinguishes the views a single resource can be bound through.
    fn view_key(&self) -> String {
        match self {
            LayoutEntry::Uniform { .. } => "uniform".to_string(),
            LayoutEntry::Storage { access, .. } => format!("storage:{}", access.wgsl()),
            LayoutEntry::Sampler { comparison } => format!("sampler:{comparison}"),
            LayoutEntry::Texture { .. } => "sampled".to_string(),
            LayoutEntry::StorageTexture { access, .. } => format!("storage_texture:{}", access.wgsl()),
            LayoutEntry::ExternalTexture => "external".to_string(),
        }
    }

    /// `var<...> name: T` (without group and binding attributes).
    fn var_declaration(&self, ctx: &mut ResolutionCtx, name: &str) -> Result<String> {
        Ok(match self {
            LayoutEntry::Uniform { schema } => {
                format!("var<uniform> {name}: {}", ctx.resolve_schema(schema)?)
            }
            LayoutEntry::Storage { schema, access } => {
                if *access == Access::Write {
                    bail!("storage buffer `{name}` cannot be write-only");
                }
                format!(
                    "var<storage, {}> {name}: {}",
                    access.wgsl(),
                    ctx.resolve_schema(schema)?
                )
            }
            LayoutEntry::Sampler { comparison: false } => format!("var {name}: sampler"),
            LayoutEntry::Sampler { comparison: true } => format!("var {name}: sampler_comparison"),
            LayoutEntry::Texture {
                sample_type,
                dimension,
                multisampled,
            } => format!("var {name}: {}", sampled_texture_type(*sample_type, *dimension, *multisampled)?),
            LayoutEntry::StorageTexture {
                format,
                access,
                dimension,
            } => {
                if matches!(dimension, TextureDimension::Cube | TextureDimension::CubeArray) {
                    bail!("storage texture `{name}` cannot be a cube texture");
                }
                if *format == TexelFormat::Depth32Float {
                    bail!("{} is not a storage texture format", format.wgsl());
                }
                format!(
                    "var {name}: texture_storage_{}<{}, {}>",
                    dimension.suffix(),
                    format.wgsl(),
                    access.wgsl()
                )
            }
            LayoutEntry::ExternalTexture => format!("var {name}: texture_external"),
        })
    }
}

fn sampled_texture_type(sample: SampleType, dimension: TextureDimension, multisampled: bool) -> Result<String> {
    let component = match sample {
        SampleType::Float | SampleType::UnfilterableFloat => "f32",
        SampleType::Sint => "i32",
        SampleType::Uint => "u32",
        SampleType::Depth => {
            return match (dimension, multisampled) {
                (TextureDimension::D2, true) => Ok("texture_depth_multisampled_2d".to_string()),
                (_, true) => bail!("multisampled depth textures must be 2d"),
                (TextureDimension::D1 | TextureDimension::D3, false) => {
                    bail!("depth textures cannot be {}", dimension.suffix())
                }
                (dim, false) => Ok(format!("texture_depth_{}", dim.suffix())),
            };
        }
    };
    if multisampled {
        if dimension != TextureDimension::D2 {
            bail!("multisampled textures must be 2d");
        }
        return Ok(format!("texture_multisampled_2d<{component}>"));
    }
    Ok(format!("texture_{}<{component}>", dimension.suffix()))
}

struct BufferDef {
    id: ItemId,
    label: Option<String>,
    schema: DataSchema,
}

/// A typed GPU buffer. Each view (`uniform`, `readonly`, `mutable`) is bound
/// once per resolution, however many items reference it.
#[derive(Clone)]
pub struct Buffer(Rc<BufferDef>);

impl Buffer {
    pub fn new(label: Option<&str>, schema: DataSchema) -> Self {
        Self(Rc::new(BufferDef {
            id: ItemId::next(),
            label: label.map(str::to_string),
            schema,
        }))
    }

    pub fn schema(&self) -> &DataSchema {
        &self.0.schema
    }

    pub fn uniform(&self) -> Item {
        self.view(LayoutEntry::Uniform {
            schema: self.0.schema.clone(),
        })
    }

    pub fn readonly(&self) -> Item {
        self.view(LayoutEntry::Storage {
            schema: self.0.schema.clone(),
            access: Access::Read,
        })
    }

    pub fn mutable(&self) -> Item {
        self.view(LayoutEntry::Storage {
            schema: self.0.schema.clone(),
            access: Access::ReadWrite,
        })
    }

    fn view(&self, entry: LayoutEntry) -> Item {
        Item::from_kind(
            self.0.label.as_deref(),
            ItemKind::Fixed {
                entry,
                resource: Resource::Buffer(self.clone()),
            },
        )
    }
}

struct TextureDef {
    id: ItemId,
    label: Option<String>,
    format: TexelFormat,
    dimension: TextureDimension,
    sample_count: u32,
}

#[derive(Clone)]
pub struct Texture(Rc<TextureDef>);

impl Texture {
    pub fn new(label: Option<&str>, format: TexelFormat, dimension: TextureDimension) -> Self {
        Self::with_sample_count(label, format, dimension, 1)
    }

    pub fn with_sample_count(
        label: Option<&str>,
        format: TexelFormat,
        dimension: TextureDimension,
        sample_count: u32,
    ) -> Self {
        Self(Rc::new(TextureDef {
            id: ItemId::next(),
            label: label.map(str::to_string),
            format,
            dimension,
            sample_count,
        }))
    }

    pub fn format(&self) -> TexelFormat {
        self.0.format
    }

    pub fn sampled(&self) -> Item {
        self.view(LayoutEntry::Texture {
            sample_type: self.0.format.sample_type(),
            dimension: self.0.dimension,
            multisampled: self.0.sample_count > 1,
        })
    }

    pub fn storage(&self, access: Access) -> Item {
        self.view(LayoutEntry::StorageTexture {
            format: self.0.format,
            access,
            dimension: self.0.dimension,
        })
    }

    fn view(&self, entry: LayoutEntry) -> Item {
        Item::from_kind(
            self.0.label.as_deref(),
            ItemKind::Fixed {
                entry,
                resource: Resource::Texture(self.clone()),
            },
        )
    }
}

struct SamplerDef {
    id: ItemId,
    label: Option<String>,
    comparison: bool,
}

#[derive(Clone)]
pub struct Sampler(Rc<SamplerDef>);

impl Sampler {
    pub fn new(label: Option<&str>) -> Self {
        Self::build(label, false)
    }

    pub fn comparison(label: Option<&str>) -> Self {
        Self::build(label, true)
    }

    fn build(label: Option<&str>, comparison: bool) -> Self {
        Self(Rc::new(SamplerDef {
            id: ItemId::next(),
            label: label.map(str::to_string),
            comparison,
        }))
    }

    pub fn binding(&self) -> Item {
        Item::from_kind(
            self.0.label.as_deref(),
            ItemKind::Fixed {
                entry: LayoutEntry::Sampler {
                    comparison: self.0.comparison,
                },
                resource: Resource::Sampler(self.clone()),
            },
        )
    }
}

struct ExternalTextureDef {
    id: ItemId,
    label: Option<String>,
}

#[derive(Clone)]
pub struct ExternalTexture(Rc<ExternalTextureDef>);

impl ExternalTexture {
    pub fn new(label: Option<&str>) -> Self {
        Self(Rc::new(ExternalTextureDef {
            id: ItemId::next(),
            label: label.map(str::to_string),
        }))
    }

    pub fn binding(&self) -> Item {
        Item::from_kind(
            self.0.label.as_deref(),
            ItemKind::Fixed {
                entry: LayoutEntry::ExternalTexture,
                resource: Resource::ExternalTexture(self.clone()),
            },
        )
    }
}

#[derive(Clone)]
pub enum Resource {
    Buffer(Buffer),
    Texture(Texture),
    Sampler(Sampler),
    ExternalTexture(ExternalTexture),
}

impl Resource {
    pub fn id(&self) -> ItemId {
        match self {
            Resource::Buffer(b) => b.0.id,
            Resource::Texture(t) => t.0.id,
            Resource::Sampler(s) => s.0.id,
            Resource::ExternalTexture(e) => e.0.id,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Resource::Buffer(b) => b.0.label.as_deref(),
            Resource::Texture(t) => t.0.label.as_deref(),
            Resource::Sampler(s) => s.0.label.as_deref(),
            Resource::ExternalTexture(e) => e.0.label.as_deref(),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Resource::Buffer(_) => "buffer",
            Resource::Texture(_) => "texture",
            Resource::Sampler(_) => "sampler",
            Resource::ExternalTexture(_) => "external texture",
        }
    }

    /// Checks that this resource can be bound to `entry`.
    fn check_fits(&self, key: &str, entry: &LayoutEntry) -> Result<()> {
        let fits = match (self, entry) {
            (Resource::Buffer(b), LayoutEntry::Uniform { schema })
            | (Resource::Buffer(b), LayoutEntry::Storage { schema, .. }) => {
                if !b.schema().same(schema) {
                    bail!(
                        "buffer for `{key}` holds {} but the layout expects {schema}",
                        b.schema()
                    );
                }
                true
            }
            (Resource::Texture(t), LayoutEntry::Texture { sample_type, dimension, multisampled }) => {
                let compatible = match (t.0.format.sample_type(), sample_type) {
                    (a, b) if a == *b => true,
                    (SampleType::Float, SampleType::UnfilterableFloat) => true,
                    _ => false,
                };
                compatible && t.0.dimension == *dimension && (t.0.sample_count > 1) == *multisampled
            }
            (Resource::Texture(t), LayoutEntry::StorageTexture { format, dimension, .. }) => {
                t.0.format == *format && t.0.dimension == *dimension
            }
            (Resource::Sampler(s), LayoutEntry::Sampler { comparison }) => s.0.comparison == *comparison,
            (Resource::ExternalTexture(_), LayoutEntry::ExternalTexture) => true,
            _ => false,
        };
        if !fits {
            bail!(
                "{} `{}` does not match layout entry `{key}` ({})",
                self.kind_name(),
                self.label().unwrap_or("<unnamed>"),
                entry.view_key()
            );
        }
        Ok(())
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_name(), self.label().unwrap_or("<unnamed>"))
    }
}

struct LayoutDef {
    id: ItemId,
    label: Option<String>,
    index: Option<u32>,
    entries: Vec<(String, Option<LayoutEntry>)>,
}

/// A named set of binding slots. Entry position is the binding index; a
/// `None` entry keeps its index reserved but unused.
#[derive(Clone)]
pub struct BindGroupLayout(Rc<LayoutDef>);

impl BindGroupLayout {
    pub fn new(label: Option<&str>, entries: Vec<(String, Option<LayoutEntry>)>) -> Self {
        Self::build(label, None, entries)
    }

    /// A layout pinned to group `index`.
    pub fn with_group(label: Option<&str>, index: u32, entries: Vec<(String, Option<LayoutEntry>)>) -> Self {
        Self::build(label, Some(index), entries)
    }

    fn build(label: Option<&str>, index: Option<u32>, entries: Vec<(String, Option<LayoutEntry>)>) -> Self {
        Self(Rc::new(LayoutDef {
            id: ItemId::next(),
            label: label.map(str::to_string),
            index,
            entries,
        }))
    }

    pub fn id(&self) -> ItemId {
        self.0.id
    }

    pub fn label(&self) -> Option<&str> {
        self.0.label.as_deref()
    }

    pub fn index(&self) -> Option<u32> {
        self.0.index
    }

    pub fn entries(&self) -> &[(String, Option<LayoutEntry>)] {
        &self.0.entries
    }

    pub fn ptr_eq(&self, other: &BindGroupLayout) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// An item that resolves to the variable bound at `key`.
    pub fn bound(&self, key: &str) -> Result<Item> {
        let Some(position) = self.0.entries.iter().position(|(k, _)| k == key) else {
            bail!("bind group layout `{self}` has no entry `{key}`");
        };
        let Some(entry) = &self.0.entries[position].1 else {
            bail!("entry `{key}` of bind group layout `{self}` is empty");
        };
        Ok(Item::from_kind(
            Some(key),
            ItemKind::LayoutBinding {
                layout: self.clone(),
                key: key.to_string(),
                binding: position as u32,
                entry: entry.clone(),
            },
        ))
    }

    /// Builds a bind group, checking that every non-empty entry is supplied
    /// with a compatible resource.
    pub fn create_bind_group(&self, resources: Vec<(String, Resource)>) -> Result<BindGroup> {
        if let Some((key, _)) = resources
            .iter()
            .find(|(key, _)| !self.0.entries.iter().any(|(k, _)| k == key))
        {
            bail!("bind group layout `{self}` has no entry `{key}`");
        }

        let mut ordered = Vec::with_capacity(resources.len());
        for (key, entry) in &self.0.entries {
            let Some(entry) = entry else { continue };
            let Some((_, resource)) = resources.iter().find(|(k, _)| k == key) else {
                return Err(ResolveError::MissingBinding {
                    layout: self.to_string(),
                    key: key.clone(),
                }
                .into());
            };
            resource.check_fits(key, entry)?;
            ordered.push((key.clone(), resource.clone()));
        }
        Ok(BindGroup {
            layout: self.clone(),
            resources: ordered,
        })
    }
}

impl fmt::Display for BindGroupLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label().unwrap_or("<unnamed>"))
    }
}

impl fmt::Debug for BindGroupLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layout:{self}")
    }
}

/// Concrete resources for every entry of a layout.
#[derive(Clone, Debug)]
pub struct BindGroup {
    layout: BindGroupLayout,
    resources: Vec<(String, Resource)>,
}

impl BindGroup {
    pub fn layout(&self) -> &BindGroupLayout {
        &self.layout
    }

    pub fn resources(&self) -> &[(String, Resource)] {
        &self.resources
    }

    pub fn resource(&self, key: &str) -> Option<&Resource> {
        self.resources.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BindingKey {
    Fixed(ItemId, String),
    Layout(ItemId, String),
}

/// Output of [`BindingAllocator::finish`].
pub(crate) struct FinishedBindings {
    pub code: String,
    pub used_bind_group_layouts: Vec<Option<BindGroupLayout>>,
    pub catchall: Option<(u32, BindGroup)>,
}

/// Per-resolution record of every binding that was emitted.
#[derive(Default)]
pub(crate) struct BindingAllocator {
    layouts: Vec<BindGroupLayout>,
    fixed: Vec<(LayoutEntry, Resource)>,
    names: HashMap<BindingKey, String>,
}

impl BindingAllocator {
    fn layout_marker(layout: &BindGroupLayout) -> String {
        format!("{LAYOUT_MARKER_PREFIX}{}#", layout.id())
    }

    /// Registers `layout` as used and returns the group placeholder.
    fn use_layout(&mut self, layout: &BindGroupLayout) -> String {
        if !self.layouts.iter().any(|l| l.ptr_eq(layout)) {
            self.layouts.push(layout.clone());
        }
        Self::layout_marker(layout)
    }

    /// Adds a catch-all entry and returns its binding index.
    fn add_fixed(&mut self, entry: LayoutEntry, resource: Resource) -> u32 {
        self.fixed.push((entry, resource));
        (self.fixed.len() - 1) as u32
    }

    /// Assigns group indices and substitutes every placeholder in `code`.
    pub fn finish(self, mut code: String) -> Result<FinishedBindings> {
        for layout in &self.layouts {
            if let Some(index) = layout.index().filter(|i| *i >= MAX_BIND_GROUPS) {
                bail!("bind group layout `{layout}` is pinned to group {index}, but groups must be below {MAX_BIND_GROUPS}");
            }
        }
        let mut taken: Vec<u32> = self.layouts.iter().filter_map(BindGroupLayout::index).collect();
        let mut next_free = move || {
            let mut i = 0;
            while taken.contains(&i) {
                i += 1;
            }
            taken.push(i);
            i
        };

        let mut used: Vec<Option<BindGroupLayout>> = Vec::new();

        let catchall = if self.fixed.is_empty() {
            None
        } else {
            let index = next_free();
            let entries = self
                .fixed
                .iter()
                .enumerate()
                .map(|(i, (entry, _))| (i.to_string(), Some(entry.clone())))
                .collect();
            let layout = BindGroupLayout::with_group(Some("catchall"), index, entries);
            let resources = self
                .fixed
                .into_iter()
                .enumerate()
                .map(|(i, (_, resource))| (i.to_string(), resource))
                .collect();
            code = code.replace(CATCHALL_MARKER, &index.to_string());
            place(&mut used, index, layout.clone());
            debug!(group = index, "assigned catch-all bind group");
            Some((index, BindGroup { layout, resources }))
        };

        for layout in self.layouts {
            let index = match layout.index() {
                Some(index) => index,
                None => next_free(),
            };
            code = code.replace(&Self::layout_marker(&layout), &index.to_string());
            debug!(layout = %layout, group = index, "assigned bind group");
            place(&mut used, index, layout);
        }

        for marker in [CATCHALL_MARKER, LAYOUT_MARKER_PREFIX] {
            if let Some(pos) = code.find(marker) {
                let end = code[pos + 1..].find('#').map_or(code.len(), |n| pos + n + 2);
                return Err(ResolveError::UnresolvedPlaceholder(code[pos..end].to_string()).into());
            }
        }

        Ok(FinishedBindings {
            code,
            used_bind_group_layouts: used,
            catchall,
        })
    }
}

fn place(used: &mut Vec<Option<BindGroupLayout>>, index: u32, layout: BindGroupLayout) {
    let index = index as usize;
    if used.len() <= index {
        used.resize(index + 1, None);
    }
    used[index] = Some(layout);
}

pub(crate) fn resolve_fixed(
    ctx: &mut ResolutionCtx,
    label: Option<&str>,
    entry: &LayoutEntry,
    resource: &Resource,
) -> Result<String> {
    let key = BindingKey::Fixed(resource.id(), entry.view_key());
    if let Some(name) = ctx.bindings().names.get(&key) {
        return Ok(name.clone());
    }
    let name = ctx.names().make_unique(label.or(resource.label()), true)?;
    let var = entry.var_declaration(ctx, &name)?;
    let binding = ctx.bindings().add_fixed(entry.clone(), resource.clone());
    ctx.add_declaration(format!("@group({CATCHALL_MARKER}) @binding({binding}) {var};"));
    ctx.bindings().names.insert(key, name.clone());
    Ok(name)
}

pub(crate) fn resolve_layout_binding(
    ctx: &mut ResolutionCtx,
    layout: &BindGroupLayout,
    key: &str,
    binding: u32,
    entry: &LayoutEntry,
) -> Result<String> {
    let cache_key = BindingKey::Layout(layout.id(), key.to_string());
    if let Some(name) = ctx.bindings().names.get(&cache_key) {
        return Ok(name.clone());
    }
    let name = ctx.names().make_unique(Some(key), true)?;
    let var = entry.var_declaration(ctx, &name)?;
    let group = ctx.bindings().use_layout(layout);
    ctx.add_declaration(format!("@group({group}) @binding({binding}) {var};"));
    ctx.bindings().names.insert(cache_key, name.clone());
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{NamingPolicy, ResolveOptions, item::Wgsl, resolve, resolve_items};

    fn strict() -> ResolveOptions {
        ResolveOptions {
            names: NamingPolicy::Strict,
            ..Default::default()
        }
    }

    fn uniform_f32() -> Option<LayoutEntry> {
        Some(LayoutEntry::Uniform {
            schema: DataSchema::f32(),
        })
    }

    #[test]
    fn texture_types() {
        let tex = |s, d, m| sampled_texture_type(s, d, m).unwrap();
        assert_eq!(tex(SampleType::Float, TextureDimension::D2, false), "texture_2d<f32>");
        assert_eq!(tex(SampleType::Uint, TextureDimension::D2Array, false), "texture_2d_array<u32>");
        assert_eq!(tex(SampleType::Depth, TextureDimension::Cube, false), "texture_depth_cube");
        assert_eq!(tex(SampleType::Sint, TextureDimension::D2, true), "texture_multisampled_2d<i32>");
        assert!(sampled_texture_type(SampleType::Depth, TextureDimension::D3, false).is_err());
    }

    #[test]
    fn direct_resources_share_the_catchall_group() {
        let buffer = Buffer::new(Some("particles"), DataSchema::array(DataSchema::vec4f(), 0));
        let sampler = Sampler::new(Some("linear"));
        let view = buffer.mutable();
        let root = Item::code(
            "p s p2",
            vec![
                ("p".into(), view.clone().into()),
                ("s".into(), sampler.binding().into()),
                ("p2".into(), buffer.mutable().into()),
            ],
        );
        let module = resolve(root, &strict()).unwrap();
        assert_eq!(
            module.code,
            "@group(0) @binding(0) var<storage, read_write> particles: array<vec4f>;\n\n\
             @group(0) @binding(1) var linear: sampler;\n\n\
             particles linear particles"
        );
        let (index, group) = module.catchall.as_ref().unwrap();
        assert_eq!(*index, 0);
        assert_eq!(group.resources().len(), 2);
    }

    #[test]
    fn explicit_groups_are_reserved_first() {
        let pinned = BindGroupLayout::with_group(Some("pinned"), 0, vec![("a".into(), uniform_f32())]);
        let free = BindGroupLayout::new(Some("free"), vec![("b".into(), uniform_f32())]);
        let texture = Texture::new(Some("albedo"), TexelFormat::Rgba8Unorm, TextureDimension::D2);
        let items: Vec<Wgsl> = vec![
            free.bound("b").unwrap().into(),
            texture.sampled().into(),
            pinned.bound("a").unwrap().into(),
        ];
        let module = resolve_items(&items, &strict()).unwrap();
        assert!(module.code.contains("@group(2) @binding(0) var<uniform> b: f32;"), "{}", module.code);
        assert!(module.code.contains("@group(1) @binding(0) var albedo: texture_2d<f32>;"));
        assert!(module.code.contains("@group(0) @binding(0) var<uniform> a: f32;"));

        let used = &module.used_bind_group_layouts;
        assert_eq!(used.len(), 3);
        assert!(used[0].as_ref().unwrap().ptr_eq(&pinned));
        assert!(used[2].as_ref().unwrap().ptr_eq(&free));
        assert_eq!(module.catchall.as_ref().unwrap().0, 1);
    }

    #[test]
    fn out_of_range_group_pins_are_rejected() {
        let far = BindGroupLayout::with_group(Some("far"), 4_000_000_000, vec![("a".into(), uniform_f32())]);
        let err = resolve_items(&[far.bound("a").unwrap().into()], &strict()).unwrap_err();
        assert!(err.to_string().contains("pinned to group 4000000000"), "{err:#}");

        let last = BindGroupLayout::with_group(Some("last"), MAX_BIND_GROUPS - 1, vec![("a".into(), uniform_f32())]);
        let module = resolve_items(&[last.bound("a").unwrap().into()], &strict()).unwrap();
        assert_eq!(module.used_bind_group_layouts.len(), MAX_BIND_GROUPS as usize);
    }

    #[test]
    fn empty_layout_entries_keep_their_index() {
        let layout = BindGroupLayout::new(
            Some("gapped"),
            vec![("unused".into(), None), ("value".into(), uniform_f32())],
        );
        assert!(layout.bound("unused").is_err());
        assert!(layout.bound("nope").is_err());
        let module = resolve(layout.bound("value").unwrap(), &strict()).unwrap();
        assert!(module.code.starts_with("@group(0) @binding(1) var<uniform> value: f32;"));
    }

    #[test]
    fn bind_groups_check_their_resources() {
        let layout = BindGroupLayout::new(
            Some("scene"),
            vec![
                ("params".into(), uniform_f32()),
                ("smp".into(), Some(LayoutEntry::Sampler { comparison: false })),
            ],
        );
        let params = Buffer::new(Some("params"), DataSchema::f32());
        let sampler = Sampler::new(None);

        let err = layout
            .create_bind_group(vec![("params".into(), Resource::Buffer(params.clone()))])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolveError>(),
            Some(ResolveError::MissingBinding { key, .. }) if key == "smp"
        ));

        let wrong = layout.create_bind_group(vec![
            ("params".into(), Resource::Sampler(sampler.clone())),
            ("smp".into(), Resource::Sampler(sampler.clone())),
        ]);
        assert!(wrong.is_err());

        let group = layout
            .create_bind_group(vec![
                ("smp".into(), Resource::Sampler(sampler)),
                ("params".into(), Resource::Buffer(params)),
            ])
            .unwrap();
        assert_eq!(group.resources()[0].0, "params");
        assert!(group.resource("smp").is_some());
    }

    #[test]
    fn write_only_storage_buffers_are_rejected() {
        let layout = BindGroupLayout::new(
            None,
            vec![(
                "out".into(),
                Some(LayoutEntry::Storage {
                    schema: DataSchema::f32(),
                    access: Access::Write,
                }),
            )],
        );
        assert!(resolve(layout.bound("out").unwrap(), &strict()).is_err());
    }
}
