//! Resolution engine lowering a graph of shader items into one WGSL module.
//!
//! This module is organized into several submodules:
//! - `item`: The `Wgsl` value enum and item primitives (functions, constants, raw code)
//! - `slot`: Slots, derived values and typed accessors
//! - `data`: Data schemas (scalars, vectors, matrices, arrays, structs)
//! - `ctx`: The resolution context, memoization and the top-level entry points
//! - `state`: The item state stack (item, slot binding and scope layers)
//! - `name_registry`: Collision-free WGSL identifiers
//! - `binding`: Resources, bind group layouts and group/binding allocation
//! - `coerce`: Host values to WGSL literals
//! - `tree` / `codegen`: Statement-tree function bodies
//! - `validation`: WGSL validation using naga
//!
//! The main entry points are:
//! - `resolve`: Resolve a root value into code preceded by its declarations
//! - `resolve_items`: Resolve several roots into declarations only
//! - `resolve_program`: Entry points plus an optional root body
//! - `evaluate`: Unwrap slots and derived values without generating code

pub mod binding;
pub mod coerce;
pub mod ctx;
pub mod data;
pub mod error;
pub mod item;
pub mod name_registry;
pub mod slot;
pub mod tree;
pub mod types;
pub mod validation;

mod codegen;
mod state;

pub use binding::{
    Access, BindGroup, BindGroupLayout, Buffer, ExternalTexture, LayoutEntry, Resource, SampleType,
    Sampler, TexelFormat, Texture, TextureDimension,
};
pub use ctx::{ExecMode, ResolutionCtx, evaluate, resolve, resolve_items, resolve_program};
pub use data::{DataSchema, Scalar, StructSchema};
pub use error::{ResolutionError, ResolveError};
pub use item::{FnDef, FnStage, Item, Wgsl};
pub use name_registry::{NameRegistry, NamingPolicy};
pub use slot::{Accessor, Derived, Slot};
pub use tree::{JsonTreeTranspiler, Transpiler, TranspiledFn};
pub use types::{ResolveOptions, ResolvedModule};
pub use validation::{validate_wgsl, validate_wgsl_with_context};
