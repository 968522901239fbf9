//! Collision-free WGSL identifiers.
//!
//! One registry lives inside one resolution context. Global names (functions,
//! structs, bindings, constants) share one set that is seeded with every WGSL
//! keyword, reserved word and builtin. Function bodies open scopes so locals can
//! reuse names across functions and sibling blocks.

use std::collections::HashSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::error::ResolveError;

/// How fresh identifiers are derived from a primer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingPolicy {
    /// `primer_<n>` with one counter shared by every name.
    #[default]
    Random,
    /// The bare primer when free, otherwise `primer_1`, `primer_2`, ...
    Strict,
}

#[derive(Debug)]
enum ScopeLayer {
    Function,
    Block(HashSet<String>),
}

#[derive(Debug)]
pub struct NameRegistry {
    policy: NamingPolicy,
    used: HashSet<String>,
    scopes: Vec<ScopeLayer>,
    next_id: u64,
}

impl NameRegistry {
    pub fn new(policy: NamingPolicy) -> Self {
        let used = RESERVED_WORDS
            .iter()
            .chain(BUILTIN_FUNCTIONS)
            .chain(PREDECLARED_TYPES)
            .map(|s| s.to_string())
            .collect();
        Self {
            policy,
            used,
            scopes: Vec::new(),
            next_id: 0,
        }
    }

    pub fn policy(&self) -> NamingPolicy {
        self.policy
    }

    /// Returns a fresh identifier derived from `primer`.
    ///
    /// Global names are registered in the global set and are checked against
    /// every open scope; local names go into the innermost block scope.
    pub fn make_unique(&mut self, primer: Option<&str>, global: bool) -> Result<String> {
        let base = match primer {
            Some(p) => sanitize_primer(p)?,
            None => "item".to_string(),
        };

        let name = match self.policy {
            NamingPolicy::Random => loop {
                let candidate = format!("{base}_{}", self.next_id);
                self.next_id += 1;
                if !self.is_taken(&candidate, global) {
                    break candidate;
                }
            },
            NamingPolicy::Strict => {
                if !self.is_taken(&base, global) {
                    base
                } else {
                    let mut i = 1u64;
                    loop {
                        let candidate = format!("{base}_{i}");
                        if !self.is_taken(&candidate, global) {
                            break candidate;
                        }
                        i += 1;
                    }
                }
            }
        };

        self.register(&name, global);
        Ok(name)
    }

    /// Returns `primer` itself when it is a legal, unused identifier in the
    /// visible scope chain, otherwise a fresh local name.
    pub fn make_valid(&mut self, primer: &str) -> Result<String> {
        if is_valid_identifier(primer) && !self.is_used_in_scope_chain(primer) {
            self.register(primer, false);
            return Ok(primer.to_string());
        }
        self.make_unique(Some(primer), false)
    }

    /// Marks `name` as taken in the current scope without renaming it.
    pub fn reserve(&mut self, name: &str) {
        self.register(name, false);
    }

    /// True when `name` is visible from the innermost scope: a global name, or a
    /// local of an enclosing block of the current function.
    pub fn is_used_in_scope_chain(&self, name: &str) -> bool {
        for layer in self.scopes.iter().rev() {
            match layer {
                ScopeLayer::Block(names) if names.contains(name) => return true,
                ScopeLayer::Block(_) => {}
                ScopeLayer::Function => break,
            }
        }
        self.used.contains(name)
    }

    pub fn push_function_scope(&mut self) {
        self.scopes.push(ScopeLayer::Function);
        self.push_block_scope();
    }

    pub fn pop_function_scope(&mut self) {
        self.pop_block_scope();
        match self.scopes.pop() {
            Some(ScopeLayer::Function) => {}
            _ => panic!("expected function scope to be on top of the name registry"),
        }
    }

    pub fn push_block_scope(&mut self) {
        self.scopes.push(ScopeLayer::Block(HashSet::new()));
    }

    pub fn pop_block_scope(&mut self) {
        match self.scopes.pop() {
            Some(ScopeLayer::Block(_)) => {}
            _ => panic!("expected block scope to be on top of the name registry"),
        }
    }

    fn is_taken(&self, name: &str, global: bool) -> bool {
        if global {
            // A global must not be shadowed by any local that is still open.
            self.used.contains(name)
                || self.scopes.iter().any(|layer| match layer {
                    ScopeLayer::Block(names) => names.contains(name),
                    ScopeLayer::Function => false,
                })
        } else {
            self.is_used_in_scope_chain(name)
        }
    }

    fn register(&mut self, name: &str, global: bool) {
        if !global {
            if let Some(ScopeLayer::Block(names)) = self.scopes.last_mut() {
                names.insert(name.to_string());
                return;
            }
        }
        self.used.insert(name.to_string());
    }
}

/// Strips everything that cannot appear in a WGSL identifier.
///
/// Empty primers, primers made only of underscores and primers containing
/// whitespace cannot be turned into a meaningful name and are rejected.
pub fn sanitize_primer(primer: &str) -> Result<String> {
    if primer.is_empty()
        || primer.chars().all(|c| c == '_')
        || primer.chars().any(char::is_whitespace)
    {
        return Err(ResolveError::InvalidIdentifier(primer.to_string()).into());
    }

    let mut out: String = primer
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if out.is_empty() || out.chars().all(|c| c == '_') {
        return Ok("item".to_string());
    }
    while out.starts_with("__") {
        out.remove(0);
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    Ok(out)
}

/// A WGSL identifier that needs no sanitizing and is not reserved.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && s != "_"
        && !s.starts_with("__")
        && !is_reserved(s)
}

pub fn is_reserved(s: &str) -> bool {
    RESERVED_WORDS.contains(&s) || BUILTIN_FUNCTIONS.contains(&s) || PREDECLARED_TYPES.contains(&s)
}

pub fn is_builtin_function(s: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&s) || PREDECLARED_TYPES.contains(&s)
}

const RESERVED_WORDS: &[&str] = &[
    // keywords
    "alias", "break", "case", "const", "const_assert", "continue", "continuing", "default",
    "diagnostic", "discard", "else", "enable", "false", "fn", "for", "if", "let", "loop",
    "override", "requires", "return", "struct", "switch", "true", "var", "while",
    // reserved words
    "NULL", "Self", "abstract", "active", "alignas", "alignof", "as", "asm", "asm_fragment",
    "async", "attribute", "auto", "await", "become", "binding_array", "cast", "catch", "class",
    "co_await", "co_return", "co_yield", "coherent", "column_major", "common", "compile",
    "compile_fragment", "concept", "const_cast", "consteval", "constexpr", "constinit",
    "crate", "debugger", "decltype", "delete", "demote", "demote_to_helper", "do",
    "dynamic_cast", "enum", "explicit", "export", "extends", "extern", "external", "fallthrough",
    "filter", "final", "finally", "friend", "from", "fxgroup", "get", "goto", "groupshared",
    "highp", "impl", "implements", "import", "inline", "instanceof", "interface", "layout",
    "lowp", "macro", "macro_rules", "match", "mediump", "meta", "mod", "module", "move", "mut",
    "mutable", "namespace", "new", "nil", "noexcept", "noinline", "nointerpolation",
    "noperspective", "null", "nullptr", "of", "operator", "package", "packoffset", "partition",
    "pass", "patch", "pixelfragment", "precise", "precision", "premerge", "priv", "protected",
    "pub", "public", "readonly", "ref", "regardless", "register", "reinterpret_cast",
    "require", "resource", "restrict", "self", "set", "shared", "sizeof", "smooth", "snorm",
    "static", "static_assert", "static_cast", "std", "subroutine", "super", "target",
    "template", "this", "thread_local", "throw", "trait", "try", "type", "typedef", "typeid",
    "typename", "typeof", "union", "unless", "unorm", "unsafe", "unsized", "use", "using",
    "varying", "virtual", "volatile", "wgsl", "where", "with", "writeonly", "yield",
    // address spaces and access modes
    "function", "private", "workgroup", "uniform", "storage", "handle", "read", "write",
    "read_write",
];

const PREDECLARED_TYPES: &[&str] = &[
    "bool", "f16", "f32", "i32", "u32", "vec2", "vec3", "vec4", "mat2x2", "mat2x3", "mat2x4",
    "mat3x2", "mat3x3", "mat3x4", "mat4x2", "mat4x3", "mat4x4", "array", "atomic", "ptr",
    "sampler", "sampler_comparison", "texture_1d", "texture_2d", "texture_2d_array",
    "texture_3d", "texture_cube", "texture_cube_array", "texture_multisampled_2d",
    "texture_depth_2d", "texture_depth_2d_array", "texture_depth_cube",
    "texture_depth_cube_array", "texture_depth_multisampled_2d", "texture_external",
    "texture_storage_1d", "texture_storage_2d", "texture_storage_2d_array",
    "texture_storage_3d", "vec2i", "vec3i", "vec4i", "vec2u", "vec3u", "vec4u", "vec2f",
    "vec3f", "vec4f", "vec2h", "vec3h", "vec4h", "mat2x2f", "mat2x3f", "mat2x4f", "mat3x2f",
    "mat3x3f", "mat3x4f", "mat4x2f", "mat4x3f", "mat4x4f", "mat2x2h", "mat2x3h", "mat2x4h",
    "mat3x2h", "mat3x3h", "mat3x4h", "mat4x2h", "mat4x3h", "mat4x4h",
];

const BUILTIN_FUNCTIONS: &[&str] = &[
    "bitcast", "all", "any", "select", "arrayLength", "abs", "acos", "acosh", "asin", "asinh",
    "atan", "atanh", "atan2", "ceil", "clamp", "cos", "cosh", "countLeadingZeros",
    "countOneBits", "countTrailingZeros", "cross", "degrees", "determinant", "distance", "dot",
    "dot4U8Packed", "dot4I8Packed", "exp", "exp2", "extractBits", "faceForward",
    "firstLeadingBit", "firstTrailingBit", "floor", "fma", "fract", "frexp", "insertBits",
    "inverseSqrt", "ldexp", "length", "log", "log2", "max", "min", "mix", "modf", "normalize",
    "pow", "quantizeToF16", "radians", "reflect", "refract", "reverseBits", "round", "saturate",
    "sign", "sin", "sinh", "smoothstep", "sqrt", "step", "tan", "tanh", "transpose", "trunc",
    "dpdx", "dpdxCoarse", "dpdxFine", "dpdy", "dpdyCoarse", "dpdyFine", "fwidth",
    "fwidthCoarse", "fwidthFine", "textureDimensions", "textureGather", "textureGatherCompare",
    "textureLoad", "textureNumLayers", "textureNumLevels", "textureNumSamples",
    "textureSample", "textureSampleBias", "textureSampleCompare", "textureSampleCompareLevel",
    "textureSampleGrad", "textureSampleLevel", "textureSampleBaseClampToEdge", "textureStore",
    "atomicLoad", "atomicStore", "atomicAdd", "atomicSub", "atomicMax", "atomicMin",
    "atomicAnd", "atomicOr", "atomicXor", "atomicExchange", "atomicCompareExchangeWeak",
    "pack4x8snorm", "pack4x8unorm", "pack4xI8", "pack4xU8", "pack4xI8Clamp", "pack4xU8Clamp",
    "pack2x16snorm", "pack2x16unorm", "pack2x16float", "unpack4x8snorm", "unpack4x8unorm",
    "unpack4xI8", "unpack4xU8", "unpack2x16snorm", "unpack2x16unorm", "unpack2x16float",
    "storageBarrier", "textureBarrier", "workgroupBarrier", "workgroupUniformLoad",
    "subgroupAdd", "subgroupAll", "subgroupAnd", "subgroupAny", "subgroupBallot",
    "subgroupBroadcast", "subgroupElect", "subgroupMax", "subgroupMin", "subgroupMul",
    "subgroupOr", "subgroupShuffle", "subgroupXor",
];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strict_prefers_bare_name() {
        let mut names = NameRegistry::new(NamingPolicy::Strict);
        assert_eq!(names.make_unique(Some("foo"), true).unwrap(), "foo");
        assert_eq!(names.make_unique(Some("foo"), true).unwrap(), "foo_1");
        assert_eq!(names.make_unique(Some("foo"), true).unwrap(), "foo_2");
    }

    #[test]
    fn random_always_suffixes() {
        let mut names = NameRegistry::new(NamingPolicy::Random);
        assert_eq!(names.make_unique(Some("foo"), true).unwrap(), "foo_0");
        assert_eq!(names.make_unique(Some("bar"), true).unwrap(), "bar_1");
        assert_eq!(names.make_unique(None, true).unwrap(), "item_2");
    }

    #[test]
    fn reserved_words_are_never_issued() {
        let mut names = NameRegistry::new(NamingPolicy::Strict);
        assert_eq!(names.make_unique(Some("sin"), true).unwrap(), "sin_1");
        assert_eq!(names.make_unique(Some("struct"), true).unwrap(), "struct_1");
        assert_eq!(names.make_valid("vec3f").unwrap(), "vec3f_1");
    }

    #[test]
    fn sanitizes_and_rejects_primers() {
        assert_eq!(sanitize_primer("my-fn!").unwrap(), "myfn");
        assert_eq!(sanitize_primer("3d").unwrap(), "_3d");
        assert_eq!(sanitize_primer("__hidden").unwrap(), "_hidden");
        assert_eq!(sanitize_primer("-").unwrap(), "item");
        for bad in ["", "_", "___", "has space", "tab\there"] {
            assert!(
                matches!(
                    sanitize_primer(bad).unwrap_err().downcast_ref::<ResolveError>(),
                    Some(ResolveError::InvalidIdentifier(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn block_names_are_released_on_pop() {
        let mut names = NameRegistry::new(NamingPolicy::Strict);
        names.push_function_scope();
        names.push_block_scope();
        assert_eq!(names.make_valid("x").unwrap(), "x");
        assert_eq!(names.make_valid("x").unwrap(), "x_1");
        names.pop_block_scope();
        names.push_block_scope();
        assert_eq!(names.make_valid("x").unwrap(), "x");
        names.pop_block_scope();
        names.pop_function_scope();
    }

    #[test]
    fn outer_block_names_stay_reserved_inside() {
        let mut names = NameRegistry::new(NamingPolicy::Strict);
        names.push_function_scope();
        assert_eq!(names.make_valid("acc").unwrap(), "acc");
        names.push_block_scope();
        assert_eq!(names.make_valid("acc").unwrap(), "acc_1");
        names.pop_block_scope();
        names.pop_function_scope();
    }

    #[test]
    fn function_scope_hides_caller_locals() {
        let mut names = NameRegistry::new(NamingPolicy::Strict);
        names.push_function_scope();
        assert_eq!(names.make_valid("tmp").unwrap(), "tmp");
        names.push_function_scope();
        assert_eq!(names.make_valid("tmp").unwrap(), "tmp");
        // ...but globals still avoid every open local.
        assert_eq!(names.make_unique(Some("tmp"), true).unwrap(), "tmp_1");
        names.pop_function_scope();
        names.pop_function_scope();
    }

    #[test]
    #[should_panic(expected = "expected block scope")]
    fn unbalanced_pop_panics() {
        let mut names = NameRegistry::new(NamingPolicy::Strict);
        names.pop_block_scope();
    }

    proptest! {
        #[test]
        fn identical_labels_get_distinct_legal_names(
            label in "[a-zA-Z][a-zA-Z0-9_]{0,8}",
            count in 1usize..40,
            strict in any::<bool>(),
        ) {
            let policy = if strict { NamingPolicy::Strict } else { NamingPolicy::Random };
            let mut names = NameRegistry::new(policy);
            let mut issued = HashSet::new();
            for _ in 0..count {
                let name = names.make_unique(Some(&label), true).unwrap();
                prop_assert!(is_valid_identifier(&name), "{name} is not a legal identifier");
                prop_assert!(issued.insert(name));
            }
        }
    }
}
