use std::env;

const DEFAULT_BASE_URL: &str = "http://localhost:8000/v1";
const DEFAULT_MODEL: &str = "llama-31-8b-instruct";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 500;
const DEFAULT_TOP_P: f32 = 0.9;
const DEFAULT_STREAM: bool = true;
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful and knowledgeable AI assistant. Provide concise and accurate answers.";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_WEB_BIND_ADDR: &str = "127.0.0.1:8080";

/// Sampling parameters sent with every request of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub stream: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            top_p: DEFAULT_TOP_P,
            stream: DEFAULT_STREAM,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub system_prompt: String,
    pub timeout_secs: u64,
    pub web_bind_addr: String,
    pub generation: GenerationConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_env_with(|key| env::var(key).ok())
    }

    pub(crate) fn from_env_with(mut get_var: impl FnMut(&str) -> Option<String>) -> Self {
        let generation = GenerationConfig {
            model: non_empty(get_var("MODEL_NAME")).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: parse_temperature(get_var("TEMPERATURE").as_deref()),
            max_output_tokens: parse_max_output_tokens(get_var("MAX_OUTPUT_TOKENS").as_deref()),
            top_p: parse_top_p(get_var("TOP_P").as_deref()),
            stream: parse_bool(get_var("STREAM_RESPONSE").as_deref(), DEFAULT_STREAM),
        };

        Self {
            base_url: non_empty(get_var("VLLM_API_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            system_prompt: get_var("SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            timeout_secs: parse_timeout_secs(get_var("MODEL_TIMEOUT_SECS").as_deref()),
            web_bind_addr: non_empty(get_var("WEB_BIND_ADDR"))
                .unwrap_or_else(|| DEFAULT_WEB_BIND_ADDR.to_string()),
            generation,
        }
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_timeout_secs(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
}

fn parse_max_output_tokens(raw: Option<&str>) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS)
}

fn parse_temperature(raw: Option<&str>) -> f32 {
    raw.and_then(|value| value.trim().parse::<f32>().ok())
        .filter(|value| (0.0..=2.0).contains(value))
        .unwrap_or(DEFAULT_TEMPERATURE)
}

fn parse_top_p(raw: Option<&str>) -> f32 {
    raw.and_then(|value| value.trim().parse::<f32>().ok())
        .filter(|value| *value > 0.0 && *value <= 1.0)
        .unwrap_or(DEFAULT_TOP_P)
}

fn parse_bool(raw: Option<&str>, default: bool) -> bool {
    match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
