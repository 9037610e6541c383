//! Prompt templates and system prompt assembly.

use std::path::Path;

use chrono::Utc;
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

/// Prompt template for system prompt assembly (`MiniJinja`).
pub const SYSTEM_PROMPT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/system_prompt_template.md"
));

/// Directive appended to the last user turn when asking for relevant files.
pub const DYNAMIC_CONTEXT_DIRECTIVE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/dynamic_context_directive.md"
));

#[derive(Debug, Clone, Serialize)]
struct PromptTemplateVars<'a> {
    base_prompt: &'a str,
    project_root: String,
    structure: &'a str,
    content: &'a str,
    date: String,
}

/// Builds the system prompt for one chat turn from the project's bundle.
///
/// Falls back to a plain concatenation if the template fails to render.
pub fn build_system_prompt(
    base_prompt: Option<&str>,
    project_root: &Path,
    structure: &str,
    content: &str,
) -> String {
    let vars = PromptTemplateVars {
        base_prompt: base_prompt.map(str::trim).unwrap_or_default(),
        project_root: project_root.display().to_string(),
        structure: structure.trim_end(),
        content: content.trim_end(),
        date: Utc::now().format("%Y-%m-%d").to_string(),
    };

    match render_prompt_template(SYSTEM_PROMPT_TEMPLATE, &vars) {
        Ok(rendered) => rendered,
        Err(error) => {
            tracing::warn!("Failed to render system prompt template: {error}");
            [vars.base_prompt, vars.structure, vars.content]
                .iter()
                .filter(|part| !part.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join("\n\n")
        }
    }
}

fn render_prompt_template(template: &str, vars: &PromptTemplateVars<'_>) -> Result<String, String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template("system_prompt", template)
        .map_err(|error| error.to_string())?;

    let output = env
        .get_template("system_prompt")
        .map_err(|error| error.to_string())?
        .render(vars)
        .map_err(|error| error.to_string())?;

    Ok(output.replace("\r\n", "\n").trim().to_string())
}
