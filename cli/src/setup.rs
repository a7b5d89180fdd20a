use anyhow::{Context, Result};
use dialoguer::Input;

/// Asks which LLM provider to use. The answer is lowercased, not validated.
pub fn prompt_llm_type() -> Result<String> {
    let llm_type: String = Input::new()
        .with_prompt("Enter LLM type (openai/anthropic/groq/gemini)")
        .interact_text()
        .context("Failed to read LLM type")?;

    Ok(llm_type.trim().to_lowercase())
}

/// First character uppercased, the rest lowercased.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

pub fn banner(llm_type: &str) -> String {
    format!("Starting Hive CLI 🐝 using {} LLM", capitalize(llm_type))
}
