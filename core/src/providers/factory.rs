use crate::config::Config;
use crate::providers::{OllamaProvider, OpenAIProvider};
use crate::traits::Provider;
use anyhow::{Result, anyhow};

/// Vendors reached through their OpenAI-compatible chat completions endpoint.
struct CompatVendor {
    name: &'static str,
    base_url: &'static str,
    model: &'static str,
    key_vars: &'static [&'static str],
}

const COMPAT_VENDORS: &[CompatVendor] = &[
    CompatVendor {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        model: "gpt-4o",
        key_vars: &["OPENAI_API_KEY", "HIVE_OPENAI_API_KEY"],
    },
    CompatVendor {
        name: "anthropic",
        base_url: "https://api.anthropic.com/v1",
        model: "claude-3-5-sonnet-latest",
        key_vars: &["ANTHROPIC_API_KEY", "HIVE_ANTHROPIC_API_KEY"],
    },
    CompatVendor {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        model: "llama-3.3-70b-versatile",
        key_vars: &["GROQ_API_KEY", "HIVE_GROQ_API_KEY"],
    },
    CompatVendor {
        name: "gemini",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        model: "gemini-1.5-flash",
        key_vars: &["GEMINI_API_KEY", "GOOGLE_API_KEY", "HIVE_GEMINI_API_KEY"],
    },
];

pub fn known_providers() -> Vec<&'static str> {
    COMPAT_VENDORS
        .iter()
        .map(|v| v.name)
        .chain(std::iter::once("ollama"))
        .collect()
}

pub fn create_provider(llm_type: &str, config: &Config) -> Result<Box<dyn Provider>> {
    let provider_name = llm_type.trim().to_lowercase();

    if provider_name == "ollama" {
        let mut provider = OllamaProvider::new();
        if let Some(model) = &config.model {
            provider = provider.with_model(model.clone());
        }
        if let Some(base_url) = &config.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        return Ok(Box::new(provider));
    }

    let vendor = COMPAT_VENDORS
        .iter()
        .find(|v| v.name == provider_name)
        .ok_or_else(|| {
            anyhow!(
                "Unknown provider: {}. Available: {}",
                provider_name,
                known_providers().join(", ")
            )
        })?;

    let api_key = resolve_api_key_with_fallback(vendor.key_vars, &config.api_key)
        .map_err(|e| anyhow!("{} for {} (tried {})", e, vendor.name, vendor.key_vars.join(", ")))?;

    let provider = OpenAIProvider::new(api_key)
        .with_name(vendor.name)
        .with_model(config.model.as_deref().unwrap_or(vendor.model))
        .with_base_url(config.base_url.as_deref().unwrap_or(vendor.base_url));

    tracing::debug!(
        "Using {} provider at {}",
        vendor.name,
        provider.base_url()
    );

    Ok(Box::new(provider))
}

fn resolve_api_key_with_fallback(env_vars: &[&str], config_key: &str) -> Result<String> {
    for var_name in env_vars {
        if let Ok(key) = resolve_api_key_from_env(var_name) {
            return Ok(key);
        }
    }
    if !config_key.is_empty() {
        Ok(config_key.to_string())
    } else {
        Err(anyhow!("No API key found"))
    }
}

fn resolve_api_key_from_env(var_name: &str) -> Result<String> {
    std::env::var(var_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow!("Environment variable {} not set", var_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_lists_known_ones() {
        let err = create_provider("mystery", &Config::default())
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("Unknown provider: mystery"));
        assert!(err.contains("openai"));
        assert!(err.contains("ollama"));
    }

    #[test]
    fn ollama_needs_no_key() {
        let provider = create_provider("Ollama", &Config::default()).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.default_model(), "llama3.2");
    }

    #[test]
    fn config_key_and_model_are_used() {
        let config = Config {
            api_key: "sk-test".to_string(),
            model: Some("tiny".to_string()),
            ..Default::default()
        };
        let provider = create_provider("groq", &config).unwrap();
        assert_eq!(provider.name(), "groq");
        assert_eq!(provider.default_model(), "tiny");
    }

    #[test]
    fn config_key_is_the_fallback() {
        let key = resolve_api_key_with_fallback(&["HIVE_TEST_SURELY_UNSET_VAR"], "from-config")
            .unwrap();
        assert_eq!(key, "from-config");
        assert!(resolve_api_key_with_fallback(&["HIVE_TEST_SURELY_UNSET_VAR"], "").is_err());
    }

    #[test]
    fn every_vendor_is_known() {
        assert_eq!(
            known_providers(),
            vec!["openai", "anthropic", "groq", "gemini", "ollama"]
        );
    }
}
