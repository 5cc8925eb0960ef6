//! Prompt templates with `{placeholder}` substitution.
//!
//! Placeholders name either a prior stage (`{analysis}`) or one of the
//! reserved values: `{input}`, `{depth}` and `{latest}`. `{{` and `}}`
//! produce literal braces. Braces that do not enclose an identifier are
//! copied through unchanged.

use crate::context::{StageContext, DEPTH_KEY, INPUT_KEY, LATEST_KEY, RESERVED_KEYS};
use crate::errors::MissingReferenceError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_\-.]*)\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses a template.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let segments = parse(&source);
        Self { source, segments }
    }

    /// Returns the template text as written.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns every placeholder, in order of first appearance.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment {
                if !seen.contains(&name.as_str()) {
                    seen.push(name);
                }
            }
        }
        seen
    }

    /// Returns the stage names this template reads, excluding reserved keys.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|name| !RESERVED_KEYS.contains(name))
            .map(str::to_string)
            .collect()
    }

    /// Renders the template against a stage context.
    ///
    /// Every prior output substituted into the prompt is cut to `budget`
    /// characters. The run input and depth are never cut.
    ///
    /// # Errors
    ///
    /// Returns `MissingReferenceError` if a placeholder names an output the
    /// context does not contain.
    pub fn render(
        &self,
        ctx: &StageContext<'_>,
        budget: Option<usize>,
    ) -> Result<String, MissingReferenceError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match name.as_str() {
                    INPUT_KEY => out.push_str(&ctx.input().goal),
                    DEPTH_KEY => out.push_str(ctx.input().depth_or_default().as_str()),
                    LATEST_KEY => match ctx.outputs().latest() {
                        Some((_, text)) => out.push_str(truncate_chars(text, budget)),
                        None => out.push_str(&ctx.input().goal),
                    },
                    other => {
                        let text = ctx
                            .outputs()
                            .get(other)
                            .ok_or_else(|| MissingReferenceError::new(ctx.stage_name(), other))?;
                        out.push_str(truncate_chars(text, budget));
                    }
                },
            }
        }
        Ok(out)
    }
}

impl From<String> for PromptTemplate {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

impl From<&str> for PromptTemplate {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<PromptTemplate> for String {
    fn from(template: PromptTemplate) -> Self {
        template.source
    }
}

/// Returns the first `budget` characters of `text`.
///
/// Cuts on a char boundary; `None` keeps the whole text.
#[must_use]
pub fn truncate_chars(text: &str, budget: Option<usize>) -> &str {
    let Some(limit) = budget else {
        return text;
    };
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn parse(source: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(source) {
        let Some(whole) = caps.get(0) else { continue };
        literal.push_str(&source[last..whole.start()]);
        last = whole.end();

        match caps.get(1) {
            Some(name) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name.as_str().to_string()));
            }
            None if whole.as_str() == "{{" => literal.push('{'),
            None => literal.push('}'),
        }
    }

    literal.push_str(&source[last..]);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, Depth, PipelineInput, RunIdentity};
    use pretty_assertions::assert_eq;

    fn render(template: &str, outputs: &Context, budget: Option<usize>) -> Result<String, MissingReferenceError> {
        let run = RunIdentity::new("t");
        let input = PipelineInput::new("quantum computing").with_depth(Depth::Exhaustive);
        let ctx = StageContext::new(&run, "current", &input, outputs);
        PromptTemplate::new(template).render(&ctx, budget)
    }

    #[test]
    fn test_placeholders_and_references() {
        let template = PromptTemplate::new("{input} {framework} {depth} {framework} {latest} {analysis}");
        assert_eq!(
            template.placeholders(),
            vec!["input", "framework", "depth", "latest", "analysis"]
        );
        assert_eq!(template.references(), vec!["framework".to_string(), "analysis".to_string()]);
    }

    #[test]
    fn test_render_reserved_values() {
        let out = render("Create a framework for {depth} investigation of: {input}", &Context::new(), None).unwrap();
        assert_eq!(out, "Create a framework for exhaustive investigation of: quantum computing");
    }

    #[test]
    fn test_render_prior_output() {
        let outputs: Context = [("framework", "F"), ("deep_dive", "D")].into_iter().collect();
        let out = render("Framework: {framework}\nDeep Dive: {deep_dive}", &outputs, None).unwrap();
        assert_eq!(out, "Framework: F\nDeep Dive: D");
    }

    #[test]
    fn test_render_latest_falls_back_to_input() {
        assert_eq!(render("{latest}", &Context::new(), None).unwrap(), "quantum computing");

        let outputs: Context = [("a", "first"), ("b", "second")].into_iter().collect();
        assert_eq!(render("{latest}", &outputs, None).unwrap(), "second");
    }

    #[test]
    fn test_render_missing_reference() {
        let err = render("{nope}", &Context::new(), None).unwrap_err();
        assert_eq!(err.stage, "current");
        assert_eq!(err.reference, "nope");
    }

    #[test]
    fn test_budget_applies_to_outputs_only() {
        let outputs: Context = [("a", "abcdefgh")].into_iter().collect();
        let out = render("{input}|{a}|{latest}", &outputs, Some(3)).unwrap();
        assert_eq!(out, "quantum computing|abc|abc");
    }

    #[test]
    fn test_escaped_and_stray_braces() {
        let out = render("{{literal}} { spaced } {", &Context::new(), None).unwrap();
        assert_eq!(out, "{literal} { spaced } {");
        assert!(PromptTemplate::new("{{a}}").placeholders().is_empty());
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", Some(2)), "hé");
        assert_eq!(truncate_chars("short", Some(10)), "short");
        assert_eq!(truncate_chars("abc", Some(0)), "");
        assert_eq!(truncate_chars("abc", None), "abc");
    }

    #[test]
    fn test_template_serde_as_string() {
        let template: PromptTemplate = serde_json::from_str(r#""Analyze {deep_dive}""#).unwrap();
        assert_eq!(template.references(), vec!["deep_dive".to_string()]);
        assert_eq!(serde_json::to_string(&template).unwrap(), r#""Analyze {deep_dive}""#);
    }
}
