//! Error types raised by the resolution engine.
//!
//! Leaf failures are [`ResolveError`] values carried inside `anyhow::Error`.
//! Whenever an error unwinds through an item, the engine wraps it into a
//! [`ResolutionError`] (or prepends the item to an existing one) so the final
//! error shows the full chain of ancestors.

use std::fmt;

/// Traces longer than this are shortened when rendered.
const MAX_TRACE_LINES: usize = 20;
const TRACE_HEAD: usize = 11;
const TRACE_TAIL: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("missing value for {slot}")]
    MissingSlotValue { slot: String },

    #[error("missing externals in {function}: {}", names.join(", "))]
    MissingExternals { function: String, names: Vec<String> },

    #[error("undefined identifier `{0}`")]
    UndefinedIdentifier(String),

    #[error("invalid identifier primer {0:?}")]
    InvalidIdentifier(String),

    #[error("cyclic dependency: {0} depends on itself")]
    Cycle(String),

    #[error("{0} is not allowed in {1:?} mode")]
    ModeViolation(&'static str, super::ctx::ExecMode),

    #[error("missing binding `{key}` for bind group layout `{layout}`")]
    MissingBinding { layout: String, key: String },

    #[error("missing bind group for layout `{layout}` (group {group})")]
    MissingBindGroup { layout: String, group: u32 },

    #[error("internal: unresolved placeholder `{0}` left in generated code")]
    UnresolvedPlaceholder(String),
}

/// An error that happened while resolving an item, with the chain of items
/// (root first) that led to it.
#[derive(Debug)]
pub struct ResolutionError {
    trace: Vec<String>,
    cause: anyhow::Error,
}

impl ResolutionError {
    pub fn new(cause: anyhow::Error, ancestor: impl fmt::Display) -> Self {
        Self {
            trace: vec![ancestor.to_string()],
            cause,
        }
    }

    /// Returns the same error with `ancestor` in front of the trace.
    pub fn prepend(mut self, ancestor: impl fmt::Display) -> Self {
        self.trace.insert(0, ancestor.to_string());
        self
    }

    /// Ancestors from the root down to the failing item.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// The typed leaf error, when the cause is one.
    pub fn kind(&self) -> Option<&ResolveError> {
        self.cause.downcast_ref::<ResolveError>()
    }

    fn render(&self) -> String {
        let mut lines: Vec<String> = self.trace.iter().map(|t| format!("- {t}")).collect();
        if lines.len() > MAX_TRACE_LINES {
            let tail = lines.split_off(lines.len() - TRACE_TAIL);
            lines.truncate(TRACE_HEAD);
            lines.push("...".to_string());
            lines.extend(tail);
        }
        format!(
            "Resolution of the following tree failed:\n{}: {:#}",
            lines.join("\n"),
            self.cause
        )
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::error::Error for ResolutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_keeps_root_first() {
        let err = ResolutionError::new(anyhow::anyhow!("boom"), "fn:leaf")
            .prepend("fn:middle")
            .prepend("code:root");
        assert_eq!(err.trace(), ["code:root", "fn:middle", "fn:leaf"]);
        let text = err.to_string();
        assert!(text.starts_with("Resolution of the following tree failed:\n- code:root\n"));
        assert!(text.ends_with("- fn:leaf: boom"));
    }

    #[test]
    fn long_traces_are_shortened() {
        let mut err = ResolutionError::new(anyhow::anyhow!("deep"), "fn:f24");
        for i in (0..24).rev() {
            err = err.prepend(format!("fn:f{i}"));
        }
        let text = err.to_string();
        let lines: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(lines.len(), TRACE_HEAD + 1 + TRACE_TAIL);
        assert_eq!(lines[0], "- fn:f0");
        assert_eq!(lines[TRACE_HEAD - 1], "- fn:f10");
        assert_eq!(lines[TRACE_HEAD], "...");
        assert_eq!(lines[TRACE_HEAD + 1], "- fn:f15");
        assert!(text.ends_with("- fn:f24: deep"));
    }

    #[test]
    fn kind_exposes_leaf_error() {
        let err = ResolutionError::new(
            ResolveError::MissingSlotValue {
                slot: "slot:size".into(),
            }
            .into(),
            "fn:getSize",
        );
        assert!(matches!(
            err.kind(),
            Some(ResolveError::MissingSlotValue { slot }) if slot == "slot:size"
        ));
    }
}
