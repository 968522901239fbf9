//! WGSL validation of resolved modules using naga.

use anyhow::{Context, Result, anyhow};

/// Parses and validates WGSL source.
///
/// Returns the naga module on success. On failure the error carries naga's
/// diagnostic followed by the numbered source.
pub fn validate_wgsl(source: &str) -> Result<naga::Module> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("WGSL parsing failed:\n{}", numbered_source(source, &e.emit_to_string(source))))?;

    naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&module)
        .map_err(|e| anyhow!("WGSL validation failed:\n{}", numbered_source(source, &e.emit_to_string(source))))?;

    Ok(module)
}

/// Validates WGSL, naming what produced it in the error.
pub fn validate_wgsl_with_context(source: &str, context: &str) -> Result<naga::Module> {
    validate_wgsl(source).with_context(|| format!("{context} is not valid WGSL"))
}

fn numbered_source(source: &str, diagnostic: &str) -> String {
    let mut output = String::new();
    output.push_str(diagnostic.trim_end());
    output.push_str("\n\nGenerated WGSL:\n---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");
    output
}
