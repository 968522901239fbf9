use std::path::{Path, PathBuf};

use shader_forge::{
    dsl,
    resolver::{NamingPolicy, ResolveOptions},
};

fn case_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("cases")
        .join("graph")
}

fn list_json_cases(dir: &Path) -> Vec<PathBuf> {
    let mut cases: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    cases.sort();
    cases
}

fn case_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("case")
        .to_string()
}

fn strict_validating() -> ResolveOptions {
    ResolveOptions {
        names: NamingPolicy::Strict,
        validate: true,
    }
}

#[test]
fn graph_cases_resolve_to_valid_wgsl() {
    let dir = case_dir();
    let update_goldens = std::env::var("UPDATE_GOLDENS").is_ok_and(|v| v != "0");

    let cases = list_json_cases(&dir);
    assert!(!cases.is_empty(), "expected at least one *.json case in {}", dir.display());

    for input_path in cases {
        let case_name = case_stem(&input_path);
        let graph = dsl::load_graph_from_path(&input_path)
            .unwrap_or_else(|e| panic!("case {case_name}: load graph failed: {e:#}"));

        let module = dsl::resolve_graph(&graph, &strict_validating())
            .unwrap_or_else(|e| panic!("case {case_name}: resolve failed: {e:#}"));
        assert!(!module.code.trim().is_empty(), "case {case_name}: module should not be empty");

        // Same graph, same options: byte-identical output.
        let again = dsl::resolve_graph(&graph, &strict_validating())
            .unwrap_or_else(|e| panic!("case {case_name}: second resolve failed: {e:#}"));
        assert_eq!(module.code, again.code, "case {case_name}: output is not deterministic");

        // Only cases with a committed golden are compared byte for byte.
        let golden_path = dir.join(format!("{case_name}.wgsl"));
        if update_goldens {
            std::fs::write(&golden_path, &module.code)
                .unwrap_or_else(|e| panic!("write {:?}: {e}", golden_path));
        } else if golden_path.exists() {
            let expected = std::fs::read_to_string(&golden_path)
                .unwrap_or_else(|e| panic!("read {:?}: {e}", golden_path));
            assert_eq!(module.code, expected, "case {case_name}: golden mismatch");
        }
    }
}

#[test]
fn fullscreen_tint_places_layout_after_catchall() {
    let graph = dsl::load_graph_from_path(case_dir().join("fullscreen-tint.json")).unwrap();
    let module = dsl::resolve_graph(&graph, &strict_validating()).unwrap();

    assert_eq!(module.used_bind_group_layouts.len(), 2);
    let (catchall_index, catchall) = module.catchall.as_ref().expect("texture and sampler need a catch-all group");
    assert_eq!(*catchall_index, 0);
    assert_eq!(catchall.resources().len(), 2);
    assert!(module.code.contains("@group(0) @binding(0) var src: texture_2d<f32>;"));
    assert!(module.code.contains("@group(0) @binding(1) var smp: sampler;"));
    assert!(module.code.contains("@group(1) @binding(0) var<uniform> tint: vec4f;"));
    assert_eq!(module.used_bind_group_layouts[1].as_ref().map(|l| l.to_string()), Some("frame".to_string()));
}

#[test]
fn particles_specialize_per_time_step() {
    let graph = dsl::load_graph_from_path(case_dir().join("particles.json")).unwrap();
    let module = dsl::resolve_graph(&graph, &strict_validating()).unwrap();
    let code = &module.code;

    assert_eq!(code.matches("struct Particle {").count(), 1);
    assert_eq!(code.matches("var<storage, read_write> particles").count(), 1);
    assert!(code.contains("const gravity: vec3f = vec3f(0.0, -9.8, 0.0);"));
    assert!(code.contains("fn integrate(p: Particle) -> Particle {"));
    assert!(code.contains("fn integrate_1(p: Particle) -> Particle {"));
    assert!(code.contains("moved.velocity += gravity * 0.016;"));
    assert!(code.contains("moved.velocity += gravity * 4e-3;"));
    assert!(code.contains("fn step_1("));
    assert!(code.contains("particles[i] = integrate_1(particles[i]);"));
}

#[test]
fn graph_options_apply_when_resolving() {
    let graph = dsl::load_graph_from_path(case_dir().join("compute-scale.json")).unwrap();
    let options = graph.options.clone().unwrap_or_default();
    assert_eq!(options.names, NamingPolicy::Strict);
    let module = dsl::resolve_graph(&graph, &options).unwrap();
    assert!(module.code.contains("fn main("));
}
