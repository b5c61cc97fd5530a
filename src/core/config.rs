//! Runtime configuration, read once at startup from the environment.

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_API_TYPE: &str = "openai";

/// Provider settings resolved from `OPENAI_*` environment variables.
///
/// Missing or empty variables fall back to the defaults above; an empty
/// string counts as unset so that `FOO=` in a shell profile does not
/// masquerade as configuration.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub api_key: Option<String>,
    pub api_type: String,
    pub base_url: String,
    pub model: String,
    pub org_id: Option<String>,
    pub use_mock: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary variable lookup. Tests use
    /// this to supply variables without touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        Self {
            api_key: var("OPENAI_API_KEY"),
            api_type: var("OPENAI_API_TYPE").unwrap_or_else(|| DEFAULT_API_TYPE.to_string()),
            base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            org_id: var("OPENAI_ORG_ID"),
            use_mock: var("OPENAI_USE_MOCK").as_deref() == Some("true"),
        }
    }

    /// Whether completions must be synthesized locally: either mock mode was
    /// requested explicitly, or there is no API key to call out with.
    pub fn mock_only(&self) -> bool {
        self.use_mock || self.api_key.is_none()
    }
}
