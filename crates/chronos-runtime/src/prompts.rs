//! Prompt construction seam.

use chronos_extract::GRAPH_SCHEMA_V1;

use crate::executor::StepContext;
use crate::types::Step;

/// Builds the prompt text for each step from the run's source and artifacts.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, step: Step, ctx: &StepContext<'_>) -> String;

    /// Prompt for the knowledge-graph extraction call made during Stage2.
    fn graph_extraction(&self, ctx: &StepContext<'_>) -> String;
}

/// Built-in templates.
#[derive(Debug, Clone)]
pub struct DefaultPrompts {
    pub num_questions: usize,
    pub top_n: usize,
}

impl Default for DefaultPrompts {
    fn default() -> Self {
        Self {
            num_questions: 10,
            top_n: 3,
        }
    }
}

fn section(title: &str, body: Option<&str>) -> String {
    format!("## {}\n\n{}\n\n", title, body.unwrap_or("(not available)"))
}

const LENSES: [(Step, &str, &str); 3] = [
    (
        Step::LensA,
        "Modern Research Extensions",
        "Propose directions where current methods could test or extend the historical observations.",
    ),
    (
        Step::LensB,
        "Historical Observation Extensions",
        "Propose directions that follow overlooked details of the historical observations themselves.",
    ),
    (
        Step::LensC,
        "Bridge Questions",
        "Propose questions that connect the historical record to open modern problems.",
    ),
];

impl PromptBuilder for DefaultPrompts {
    fn build(&self, step: Step, ctx: &StepContext<'_>) -> String {
        let a = |s: Step| ctx.artifacts.get(s);
        match step {
            Step::Brainstorm => format!(
                "You are reading a historical source. Brainstorm every observation, claim, \
                 anomaly and implicit mechanism it contains, and criticise your own ideas as you go.\n\n{}",
                section("Source text", Some(ctx.source_text))
            ),
            Step::Context => format!(
                "Summarise the historical context of the source: who observed what, under which \
                 conditions, and which entities and causal links the brainstorm relies on.\n\n{}{}",
                section("Brainstorm", a(Step::Brainstorm)),
                section("Source text", Some(ctx.source_text))
            ),
            Step::LensA | Step::LensB | Step::LensC => {
                let (name, task) = LENSES
                    .iter()
                    .find(|(s, _, _)| *s == step)
                    .map(|(_, name, task)| (*name, *task))
                    .unwrap_or(("Alternatives", "Propose alternative research directions."));
                format!(
                    "Lens: {}. {} Do not select yet; list every plausible alternative.\n\n{}{}",
                    name,
                    task,
                    section("Brainstorm", a(Step::Brainstorm)),
                    section("Context", a(Step::Context))
                )
            }
            Step::Synthesis => format!(
                "Synthesise the three lenses: list the unique angles, the high-priority \
                 alternatives and the combinations that strengthen each other.\n\n{}{}{}",
                section("Lens A", a(Step::LensA)),
                section("Lens B", a(Step::LensB)),
                section("Lens C", a(Step::LensC))
            ),
            Step::Questions => format!(
                "Formulate {} research questions. Use exactly this layout for each:\n\
                 **H<n>: <title>**\n**Claim Statement:** ...\n**Historical Source:** ...\n\
                 **Modern Relevance:** ...\n**Variables:** ...\n**Mechanism:** ...\n\
                 **Testability Score: <0-10>/10**\n**Innovation Potential: High|Moderate|Low**\n\n{}{}",
                self.num_questions,
                section("Synthesis", a(Step::Synthesis)),
                section("Context", a(Step::Context))
            ),
            Step::Ranking => format!(
                "Rank the research questions and list the top {} as `1. **H<n>: <title>**` \
                 with a one-paragraph justification each.\n\n{}",
                self.top_n,
                section("Research questions", a(Step::Questions))
            ),
            Step::Summary => format!(
                "Write an executive summary of the research programme for a non-specialist reader.\n\n{}{}",
                section("Research questions", a(Step::Questions)),
                section("Ranking", a(Step::Ranking))
            ),
        }
    }

    fn graph_extraction(&self, ctx: &StepContext<'_>) -> String {
        format!(
            "Extract a knowledge graph of the entities and causal relationships in the source. \
             Answer with one JSON object and nothing else:\n\
             {{\"schema\": \"{}\", \"nodes\": [{{\"id\": \"snake_case_id\", \"type\": \"Category\"}}], \
             \"relationships\": [{{\"subject\": \"id\", \"object\": \"id\", \"type\": \"verb_phrase\", \
             \"timestamp\": \"optional\"}}]}}\n\
             Every relationship endpoint must be declared in nodes.\n\n{}{}",
            GRAPH_SCHEMA_V1,
            section("Brainstorm", ctx.artifacts.get(Step::Brainstorm)),
            section("Source text", Some(ctx.source_text))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Artifacts;

    #[test]
    fn test_prompts_carry_inputs() {
        let mut artifacts = Artifacts::default();
        artifacts.insert(Step::Brainstorm, "BRAINSTORM-TEXT".into());
        artifacts.insert(Step::Context, "CONTEXT-TEXT".into());
        let ctx = StepContext {
            run_id: "r1",
            source_text: "SOURCE-TEXT",
            artifacts: &artifacts,
        };
        let prompts = DefaultPrompts::default();

        assert!(prompts.build(Step::Brainstorm, &ctx).contains("SOURCE-TEXT"));
        let lens = prompts.build(Step::LensC, &ctx);
        assert!(lens.contains("Bridge Questions"));
        assert!(lens.contains("CONTEXT-TEXT"));
        assert!(prompts.build(Step::Questions, &ctx).contains("10 research questions"));
        assert!(prompts.build(Step::Synthesis, &ctx).contains("(not available)"));

        let graph = prompts.graph_extraction(&ctx);
        assert!(graph.contains(GRAPH_SCHEMA_V1));
        assert!(graph.contains("BRAINSTORM-TEXT"));
    }
}
