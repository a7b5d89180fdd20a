use anyhow::Result;
use clap::Parser;
use hive_core::{Config, ProviderBackend, config, default_agent};
use std::sync::Arc;

mod input;
mod logging;
mod render;
mod repl;
mod setup;

use input::ConsoleInput;
use repl::Repl;

#[derive(Parser)]
#[command(name = "hive")]
#[command(about = "hive - chat with a team of agents from the terminal", long_about = None)]
struct Cli {
    /// LLM provider: openai, anthropic, groq, gemini or ollama (asked for when omitted)
    #[arg(short, long)]
    provider: Option<String>,

    /// Print each reply once it is complete instead of streaming it
    #[arg(long)]
    batch: bool,

    /// Turn off backend debug output
    #[arg(long)]
    no_debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_init()?;

    let stream = !cli.batch && config.stream.enabled;
    let debug = !cli.no_debug && config.debug;
    logging::init_logging(debug);

    let llm_type = match cli.provider.or_else(|| config.provider.clone()) {
        Some(provider) => provider.trim().to_lowercase(),
        None => setup::prompt_llm_type()?,
    };

    let backend = ProviderBackend::from_llm_type(&llm_type, &config)?;
    println!("{}", setup::banner(&llm_type));

    let mut input =
        ConsoleInput::new()?.with_history(config::get_hive_dir().join("history.txt"));

    let mut repl = Repl::new(Arc::new(backend), default_agent())
        .with_context_variables(config.context_variables)
        .with_stream(stream)
        .with_debug(debug);

    repl.run(&mut input).await
}
