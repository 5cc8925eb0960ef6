//! Ready-made agent chains.
//!
//! Each preset is a list of [`StageDefinition`]s; descriptions, instructions,
//! models and tool names travel to the invoker as opaque configuration.

use crate::invoke::Invoker;
use crate::pipeline::PipelineBuilder;
use crate::refinement::RefinementDefinitions;
use crate::stages::StageDefinition;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Per-reference budget of the quick conversion chain.
pub const QUICK_REFERENCE_BUDGET: usize = 1000;

const RESEARCH_MODEL: &str = "gpt-4o-mini-2024-07-18";
const SCIENTIST_MODEL: &str = "gpt-4";
const SEARCH_TOOL: &str = "exa";

/// The built-in chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Seven-stage topic research.
    DeepResearch,
    /// Seven-stage hypothesis generation and review.
    CoScientist,
    /// Seven-stage model conversion planning.
    ConversionPlanning,
    /// Three-stage conversion sketch with tight truncation.
    QuickConversion,
}

impl Preset {
    /// Every preset.
    pub const ALL: [Self; 4] = [
        Self::DeepResearch,
        Self::CoScientist,
        Self::ConversionPlanning,
        Self::QuickConversion,
    ];

    /// Returns the preset name, used as the pipeline name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::DeepResearch => "deep_research",
            Self::CoScientist => "co_scientist",
            Self::ConversionPlanning => "conversion_planning",
            Self::QuickConversion => "quick_conversion",
        }
    }

    /// Returns the stage definitions.
    #[must_use]
    pub fn definitions(self) -> Vec<StageDefinition> {
        match self {
            Self::DeepResearch => deep_research(),
            Self::CoScientist => co_scientist(),
            Self::ConversionPlanning => conversion_planning(),
            Self::QuickConversion => quick_conversion(),
        }
    }

    /// Returns a builder holding every stage of the preset.
    #[must_use]
    pub fn builder(self, invoker: &Arc<dyn Invoker>) -> PipelineBuilder {
        PipelineBuilder::new(self.name()).add_definitions(&self.definitions(), invoker)
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name() == s)
            .ok_or_else(|| format!("unknown preset '{s}'"))
    }
}

fn research_agent(name: &str, template: &str, description: &str, instructions: &[&str]) -> StageDefinition {
    StageDefinition::new(name, template)
        .with_model(RESEARCH_MODEL)
        .with_description(description)
        .with_instructions(instructions)
}

/// Framework, deep dive, analysis, fact check, critique, synthesis and
/// recommendations. `{depth}` shapes only the framework stage.
#[must_use]
pub fn deep_research() -> Vec<StageDefinition> {
    vec![
        research_agent(
            "framework",
            "Create a research framework for {depth} investigation of: {input}",
            "You are an initial research agent that performs broad exploration of topics. \
             You identify key areas to investigate and create a research framework.",
            &[
                "Map out the key areas that need investigation",
                "Identify major sources and experts in the field",
                "Create a structured research framework",
                "Note potential research challenges",
                "Suggest specific areas for deep-dive analysis",
            ],
        )
        .with_tool(SEARCH_TOOL),
        research_agent(
            "deep_dive",
            "Conduct detailed research based on this framework:\n{framework}",
            "You are a deep-dive research agent that performs detailed investigation into specific \
             aspects of the topic. You focus on finding detailed technical information and specialized knowledge.",
            &[
                "Focus on technical details and specifics",
                "Find specialized research papers and reports",
                "Identify expert opinions and analyses",
                "Look for cutting-edge developments",
                "Document methodologies and approaches",
            ],
        )
        .with_tool(SEARCH_TOOL),
        research_agent(
            "analysis",
            "Analyze these research findings:\n{deep_dive}",
            "You are an analysis agent that evaluates research findings. \
             You analyze trends, patterns, and implications of the research.",
            &[
                "Identify emerging trends and patterns",
                "Analyze implications of findings",
                "Compare different perspectives",
                "Evaluate methodologies used",
                "Assess the strength of evidence",
            ],
        ),
        research_agent(
            "fact_check",
            "Verify the key claims and findings:\n{deep_dive}\n\nAnalysis:\n{analysis}",
            "You are a fact-checking agent that verifies claims and findings. \
             You look for supporting evidence and identify potential inaccuracies.",
            &[
                "Verify claims against reliable sources",
                "Cross-reference statistics and data",
                "Check for recent updates or corrections",
                "Assess source credibility",
                "Flag potential misinformation",
            ],
        )
        .with_tool(SEARCH_TOOL),
        research_agent(
            "critique",
            "Critically review the research and analysis:\n{deep_dive}\n\nAnalysis:\n{analysis}",
            "You are a critical review agent that challenges assumptions \
             and identifies potential biases or limitations in the research.",
            &[
                "Identify potential biases",
                "Challenge key assumptions",
                "Point out methodological limitations",
                "Suggest alternative interpretations",
                "Note conflicting evidence",
            ],
        ),
        research_agent(
            "synthesis",
            "Synthesize all research components:\n\n\
             Framework: {framework}\n\
             Deep Dive: {deep_dive}\n\
             Analysis: {analysis}\n\
             Fact Check: {fact_check}\n\
             Critique: {critique}",
            "You are a synthesis agent that combines and integrates all research findings. \
             You create a coherent narrative and identify key insights.",
            &[
                "Integrate findings from all sources",
                "Create a coherent narrative",
                "Highlight key insights and implications",
                "Address contradictions and gaps",
                "Suggest future research directions",
            ],
        ),
        research_agent(
            "recommendations",
            "Provide recommendations based on the synthesis:\n{synthesis}",
            "You are a recommendation agent that provides actionable insights \
             and suggests next steps based on the research findings.",
            &[
                "Provide actionable recommendations",
                "Prioritize suggested actions",
                "Consider practical constraints",
                "Identify potential risks",
                "Suggest implementation approaches",
            ],
        ),
    ]
}

fn scientist(name: &str, template: &str, description: &str) -> StageDefinition {
    StageDefinition::new(name, template)
        .with_model(SCIENTIST_MODEL)
        .with_description(description)
}

/// Plan, hypotheses, reviews, rankings, evolved, grouped and report.
#[must_use]
pub fn co_scientist() -> Vec<StageDefinition> {
    vec![
        scientist(
            "plan",
            "Create a structured research plan for the following goal: {input}",
            "You are a supervisor agent that orchestrates the research process, assigns tasks to other \
             agents, and allocates resources based on the research plan.",
        )
        .with_tool(SEARCH_TOOL),
        scientist(
            "hypotheses",
            "Generate initial hypotheses for: {input}\n\nResearch Plan:\n{plan}",
            "You are a generation agent that creates initial research hypotheses by exploring literature, \
             simulating debates, and identifying testable assumptions.",
        )
        .with_tool(SEARCH_TOOL),
        scientist(
            "reviews",
            "Review these hypotheses:\n{hypotheses}",
            "You are a reflection agent that reviews hypotheses, assesses correctness, quality, novelty, \
             and potential to explain existing observations.",
        )
        .with_tool(SEARCH_TOOL),
        scientist(
            "rankings",
            "Create pairwise rankings for these reviewed hypotheses:\n{reviews}",
            "You are a ranking agent that creates pairwise comparisons of hypotheses using simulated \
             debates to create an Elo rating.",
        ),
        scientist(
            "evolved",
            "Refine the top ranked hypotheses:\n{rankings}",
            "You are an evolution agent that refines best hypotheses by grounding them in literature, \
             improving coherence/feasibility, combining ideas and exploring out-of-the-box thinking.",
        )
        .with_tool(SEARCH_TOOL),
        scientist(
            "grouped",
            "Group similar hypotheses:\n{evolved}",
            "You are a proximity agent that groups similar hypotheses to optimize exploration diversity.",
        ),
        scientist(
            "report",
            "Generate a comprehensive report synthesizing all findings:\n{grouped}",
            "You are a meta-review agent that synthesizes insights from all reviews, identifies patterns, \
             optimizes other agents' performance, and creates reports.",
        ),
    ]
}

const CONVERSION_INSTRUCTIONS: [&str; 5] = [
    "Analyze the provided context thoroughly",
    "Reference relevant documentation when available",
    "Provide practical, implementable solutions",
    "Consider Apple Silicon optimizations",
    "Include code examples where appropriate",
];

fn conversion_agent(name: &str, template: &str, role: &str, focus: &str) -> StageDefinition {
    StageDefinition::new(name, template)
        .with_model(RESEARCH_MODEL)
        .with_description(format!(
            "You are {role}, an expert AI agent specializing in MLX model conversion.\n{focus}\n\
             Your responses should be clear and technical, implementation-focused, well-structured \
             and backed by documentation."
        ))
        .with_instructions(&CONVERSION_INSTRUCTIONS)
        .with_tool(SEARCH_TOOL)
}

/// Architecture analysis through documentation for converting a model.
/// The run input is the model path.
#[must_use]
pub fn conversion_planning() -> Vec<StageDefinition> {
    vec![
        conversion_agent(
            "architecture_analysis",
            "Analyze the architecture of the model at {input}. Focus on components that need conversion to MLX.",
            "Architecture Analyzer",
            "You analyze model architectures and identify key components that need conversion.",
        ),
        conversion_agent(
            "dependencies",
            "Analyze dependencies needed for converting this model to MLX:\n{architecture_analysis}",
            "Dependency Analyzer",
            "You map framework and library dependencies onto their MLX equivalents.",
        ),
        conversion_agent(
            "conversion_plan",
            "Create a detailed conversion plan based on:\n\
             Architecture: {architecture_analysis}\n\
             Dependencies: {dependencies}",
            "MLX Converter",
            "You create detailed plans for converting models to MLX, considering Apple Silicon optimizations.",
        ),
        conversion_agent(
            "code_strategy",
            "Create a code conversion strategy based on:\n\
             Conversion Plan: {conversion_plan}\n\
             Architecture: {architecture_analysis}",
            "Code Converter",
            "You focus on efficient and optimized MLX implementations for Apple Silicon.",
        )
        .as_artifact(),
        conversion_agent(
            "testing_plan",
            "Design a testing strategy for the converted model:\nCode Strategy: {code_strategy}",
            "Testing Strategist",
            "You design numerical parity and regression tests for converted models.",
        ),
        conversion_agent(
            "optimization_plan",
            "Create an optimization plan for Apple Silicon:\n\
             Code Strategy: {code_strategy}\n\
             Testing Plan: {testing_plan}",
            "Optimizer",
            "You tune memory use and throughput of MLX models on Apple Silicon.",
        ),
        conversion_agent(
            "documentation",
            "Create comprehensive documentation for the conversion process:\n\
             Architecture: {architecture_analysis}\n\
             Dependencies: {dependencies}\n\
             Conversion Plan: {conversion_plan}\n\
             Code Strategy: {code_strategy}\n\
             Testing Plan: {testing_plan}\n\
             Optimization Plan: {optimization_plan}",
            "Documentor",
            "You write user-facing documentation for converted models.",
        ),
    ]
}

/// Architecture analysis, conversion plan and code strategy, each reference
/// cut to [`QUICK_REFERENCE_BUDGET`] characters.
#[must_use]
pub fn quick_conversion() -> Vec<StageDefinition> {
    vec![
        conversion_agent(
            "architecture_analysis",
            "Analyze the architecture of {input} for MLX conversion.",
            "Architecture Analyzer",
            "You analyze model architectures and identify key components that need conversion.",
        ),
        conversion_agent(
            "conversion_plan",
            "Create MLX conversion plan for {input}. Analysis: {architecture_analysis}",
            "MLX Converter",
            "You create detailed plans for converting models to MLX, considering Apple Silicon optimizations.",
        ),
        conversion_agent(
            "code_strategy",
            "Create code strategy. Plan: {conversion_plan}",
            "Code Converter",
            "You focus on efficient and optimized MLX implementations for Apple Silicon.",
        )
        .as_artifact(),
    ]
    .into_iter()
    .map(|def| def.with_reference_budget_chars(QUICK_REFERENCE_BUDGET))
    .collect()
}

/// Analyze, generate and refine definitions for iterative code conversion.
#[must_use]
pub fn refinement() -> RefinementDefinitions {
    RefinementDefinitions {
        analyze: conversion_agent(
            "analyze",
            "Analyze the architecture of {input} for MLX conversion. \
             List the components that must be ported and their framework dependencies.",
            "Architecture Analyzer",
            "You analyze model architectures and identify key components that need conversion.",
        ),
        generate: conversion_agent(
            "generate",
            "Write an MLX implementation of {input} based on this analysis:\n{ANALYZE}",
            "Code Converter",
            "You focus on efficient and optimized MLX implementations for Apple Silicon.",
        ),
        refine: conversion_agent(
            "refine",
            "Here is the current MLX implementation:\n{latest}\n\n\
             Refine it while keeping the original component structure. \
             Improve performance and memory efficiency and add robust error handling.",
            "Code Reviewer",
            "You review MLX code and return an improved, complete implementation.",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Depth, PipelineInput};
    use crate::ratelimit::RateLimiter;
    use crate::testing::ScriptedInvoker;
    use pretty_assertions::assert_eq;

    fn names(defs: &[StageDefinition]) -> Vec<&str> {
        defs.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_preset_stage_names() {
        assert_eq!(
            names(&deep_research()),
            vec!["framework", "deep_dive", "analysis", "fact_check", "critique", "synthesis", "recommendations"]
        );
        assert_eq!(
            names(&co_scientist()),
            vec!["plan", "hypotheses", "reviews", "rankings", "evolved", "grouped", "report"]
        );
        assert_eq!(
            names(&conversion_planning()),
            vec![
                "architecture_analysis",
                "dependencies",
                "conversion_plan",
                "code_strategy",
                "testing_plan",
                "optimization_plan",
                "documentation"
            ]
        );
        assert_eq!(
            names(&quick_conversion()),
            vec!["architecture_analysis", "conversion_plan", "code_strategy"]
        );
    }

    #[test]
    fn test_every_preset_builds() {
        let invoker: Arc<dyn Invoker> = Arc::new(ScriptedInvoker::new());
        for preset in Preset::ALL {
            let pipeline = preset.builder(&invoker).build().unwrap();
            assert_eq!(pipeline.name(), preset.name());
            assert_eq!(preset.name().parse::<Preset>().unwrap(), preset);
        }
        assert!("unknown".parse::<Preset>().is_err());
    }

    #[test]
    fn test_only_first_research_stage_reads_depth() {
        let defs = deep_research();
        assert!(defs[0].template.placeholders().contains(&"depth"));
        assert!(defs[1..]
            .iter()
            .all(|d| !d.template.placeholders().contains(&"depth")));
    }

    #[test]
    fn test_quick_conversion_budget() {
        assert!(quick_conversion()
            .iter()
            .all(|d| d.reference_budget_chars == Some(QUICK_REFERENCE_BUDGET)));
    }

    #[tokio::test]
    async fn test_quick_conversion_truncates_references() {
        let long = "x".repeat(3000);
        let invoker = Arc::new(ScriptedInvoker::new().with_response("architecture_analysis", long));
        let dyn_invoker: Arc<dyn Invoker> = invoker.clone();
        let pipeline = Preset::QuickConversion
            .builder(&dyn_invoker)
            .with_rate_limiter(Arc::new(RateLimiter::disabled()))
            .build()
            .unwrap();

        pipeline.run("Wan-AI/Wan2.1-T2V-1.3B").await.unwrap();

        let prompt = &invoker.prompts_for("conversion_plan")[0];
        assert_eq!(
            prompt.len(),
            "Create MLX conversion plan for Wan-AI/Wan2.1-T2V-1.3B. Analysis: ".len() + 1000
        );
    }

    #[tokio::test]
    async fn test_deep_research_end_to_end() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let dyn_invoker: Arc<dyn Invoker> = invoker.clone();
        let pipeline = PipelineBuilder::new("deep_research")
            .with_rate_limiter(Arc::new(RateLimiter::disabled()))
            .add_definitions(&deep_research(), &dyn_invoker)
            .build()
            .unwrap();

        let outcome = pipeline
            .run(PipelineInput::new("solid-state batteries").with_depth(Depth::Brief))
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 7);
        assert_eq!(
            invoker.prompts_for("framework")[0],
            "Create a research framework for brief investigation of: solid-state batteries"
        );
        let synthesis = &invoker.prompts_for("synthesis")[0];
        assert!(synthesis.contains("Fact Check: fact_check-out"));
        assert!(synthesis.contains("Critique: critique-out"));
    }
}
