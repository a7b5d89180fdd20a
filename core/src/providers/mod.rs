pub mod factory;
pub mod ollama;
pub mod openai;
mod stream;

pub use factory::{create_provider, known_providers};
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
