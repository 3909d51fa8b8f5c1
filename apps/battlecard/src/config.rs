use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

const DEFAULT_NUMERIC_COLUMNS: &str = "employees,seats,monthly_active_users,monthly_spend";
const MAX_CONCURRENCY: usize = 64;

/// Run configuration, built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub s3: S3Settings,
    /// Address geocoding; enabled only when a Maps API key is configured.
    pub geocode: Option<GeocodeConfig>,
    pub report_path: Option<PathBuf>,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    /// Filesystem path or `s3://bucket/key`.
    pub input: String,
    pub id_column: String,
    pub numeric_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    Anthropic,
}

impl LlmProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini-2.5-flash",
            LlmProvider::Anthropic => "claude-sonnet-4-5",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "vertex" => Ok(LlmProvider::Gemini),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            other => Err(format!("unknown provider '{other}' (expected gemini or anthropic)")),
        }
    }
}

#[derive(Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    /// Vertex AI project. Only meaningful for Gemini.
    pub project: Option<String>,
    pub location: String,
    pub model_id: String,
    /// Total attempts per completion, including the first.
    pub max_retries: u32,
    pub timeout: Duration,
    /// 0 disables request spacing.
    pub requests_per_minute: u32,
    pub max_output_tokens: u32,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("project", &self.project)
            .field("location", &self.location)
            .field("model_id", &self.model_id)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    S3 { bucket: String },
    Local { root: PathBuf },
}

/// Connection settings for any S3-compatible endpoint. Used by the S3 storage
/// backend and for reading `s3://` inputs, whichever backend stores the cards.
#[derive(Clone, PartialEq)]
pub struct S3Settings {
    /// Custom endpoint (MinIO, GCS interoperability). `None` means AWS.
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials; `None` uses the default provider chain.
    pub credentials: Option<(String, String)>,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("static_credentials", &self.credentials.is_some())
            .finish()
    }
}

#[derive(Clone, PartialEq)]
pub struct GeocodeConfig {
    pub api_key: String,
    /// Region bias for ambiguous addresses (CLDR code, e.g. `US`).
    pub region_code: String,
    pub timeout: Duration,
}

impl fmt::Debug for GeocodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocodeConfig")
            .field("api_key", &"<redacted>")
            .field("region_code", &self.region_code)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub key_prefix: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub research_pass: bool,
    pub force: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            research_pass: false,
            force: false,
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let source = SourceConfig {
            input: env.require("BATTLECARD_INPUT")?,
            id_column: env.get_or("BATTLECARD_ID_COLUMN", "tenant_id"),
            numeric_columns: env
                .get_or("BATTLECARD_NUMERIC_COLUMNS", DEFAULT_NUMERIC_COLUMNS)
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect(),
        };

        let provider: LlmProvider = env.parse_or("LLM_PROVIDER", LlmProvider::Gemini)?;
        let max_retries: u32 = env.parse_or("LLM_MAX_RETRIES", 3)?;
        if max_retries == 0 {
            return Err(env.invalid("LLM_MAX_RETRIES", "must be at least 1"));
        }
        let timeout_seconds: u64 = env.parse_or("LLM_TIMEOUT_SECONDS", 60)?;
        if !(1..=600).contains(&timeout_seconds) {
            return Err(env.invalid("LLM_TIMEOUT_SECONDS", "must be between 1 and 600"));
        }
        let llm = LlmConfig {
            provider,
            api_key: env.require("LLM_API_KEY")?,
            project: env.get("GCP_PROJECT"),
            location: env.get_or("GCP_LOCATION", "us-central1"),
            model_id: env.get_or("LLM_MODEL", provider.default_model()),
            max_retries,
            timeout: Duration::from_secs(timeout_seconds),
            requests_per_minute: env.parse_or("LLM_REQUESTS_PER_MINUTE", 60)?,
            max_output_tokens: env.parse_or("LLM_MAX_OUTPUT_TOKENS", 8192)?,
        };

        let backend = match env.get_or("STORAGE_BACKEND", "s3").to_ascii_lowercase().as_str() {
            "s3" => StorageBackend::S3 {
                bucket: env.require("BATTLECARD_BUCKET")?,
            },
            "local" => StorageBackend::Local {
                root: PathBuf::from(env.get_or("LOCAL_STORAGE_DIR", "./battlecards-out")),
            },
            other => {
                return Err(env.invalid(
                    "STORAGE_BACKEND",
                    &format!("unknown backend '{other}' (expected s3 or local)"),
                ))
            }
        };
        let storage = StorageConfig {
            backend,
            key_prefix: env
                .get_or("BATTLECARD_KEY_PREFIX", "battlecards")
                .trim_matches('/')
                .to_string(),
            timeout: Duration::from_secs(env.parse_or("STORAGE_TIMEOUT_SECONDS", 30)?),
        };

        let s3 = S3Settings {
            endpoint: env.get("S3_ENDPOINT"),
            region: env.get_or("AWS_REGION", "us-east-1"),
            credentials: env
                .get("AWS_ACCESS_KEY_ID")
                .zip(env.get("AWS_SECRET_ACCESS_KEY")),
        };

        let geocode = match env.get("GOOGLE_MAPS_API_KEY") {
            Some(api_key) => Some(GeocodeConfig {
                api_key,
                region_code: env.get_or("GEOCODE_REGION_CODE", "US"),
                timeout: Duration::from_secs(env.parse_or("GEOCODE_TIMEOUT_SECONDS", 10)?),
            }),
            None => None,
        };

        let concurrency: usize = env.parse_or("BATTLECARD_CONCURRENCY", 4)?;
        let pipeline = PipelineConfig {
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
            research_pass: env.flag("BATTLECARD_RESEARCH_PASS")?,
            force: env.flag("BATTLECARD_FORCE")?,
        };

        Ok(Config {
            source,
            llm,
            storage,
            pipeline,
            s3,
            geocode,
            report_path: env.get("BATTLECARD_REPORT_PATH").map(PathBuf::from),
            log_level: env.get_or("BATTLECARD_LOG_LEVEL", "info"),
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| self.invalid(key, &format!("{raw:?}: {e}"))),
        }
    }

    fn flag(&self, key: &str) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(false),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(self.invalid(key, &format!("{other:?} is not a boolean"))),
        }
    }

    fn invalid(&self, key: &str, message: &str) -> ConfigError {
        ConfigError::Invalid {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}
