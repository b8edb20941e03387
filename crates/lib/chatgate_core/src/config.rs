//! Gateway configuration.
//!
//! Built once at process start and shared read-only with every component.
//! Nothing below this module reads the environment.

use base64::Engine;
use thiserror::Error;
use tracing::warn;

/// Default upstream chat-completion endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Limits applied by the payload sanitizer.
#[derive(Clone, Debug)]
pub struct ChatLimits {
    /// Messages beyond this count are discarded.
    pub max_messages: usize,
    /// Message content is truncated to this many characters.
    pub max_message_chars: usize,
    /// `max_tokens` used when the request omits it or it cannot be coerced.
    pub default_max_tokens: i64,
    /// Model used when the request omits one.
    pub default_model: String,
    /// Case-insensitive allow-list. Empty means any model is accepted.
    pub allowed_models: Vec<String>,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            max_messages: 50,
            max_message_chars: 4000,
            default_max_tokens: 400,
            default_model: "gpt-4o-mini".into(),
            allowed_models: Vec::new(),
        }
    }
}

/// Upstream chat-completion API settings.
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub url: String,
    /// Bearer key for the upstream API. Absent is a per-request misconfiguration.
    pub api_key: Option<String>,
    pub max_retries: u32,
    /// Serialized request bodies larger than this are refused locally.
    pub max_payload_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.into(),
            api_key: None,
            max_retries: 3,
            max_payload_bytes: 200_000,
        }
    }
}

/// Which App Store Server API host to query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppStoreEnvironment {
    Production,
    Sandbox,
}

impl AppStoreEnvironment {
    /// `prod*` (any case) selects production; anything else is sandbox.
    pub fn parse(value: &str) -> Self {
        if value.trim().to_lowercase().starts_with("prod") {
            Self::Production
        } else {
            Self::Sandbox
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Self::Production => "https://api.storekit.itunes.apple.com",
            Self::Sandbox => "https://api.storekit-sandbox.itunes.apple.com",
        }
    }
}

/// Key material for the subscription-status API.
///
/// Deliberately separate from the HS256 user-token secret.
#[derive(Clone)]
pub struct AppStoreCredentials {
    pub issuer_id: String,
    pub key_id: String,
    /// PKCS#8 PEM of the ES256 signing key.
    pub private_key_pem: String,
    /// Optional app bundle id, sent as the `bid` claim.
    pub bundle_id: Option<String>,
    pub environment: AppStoreEnvironment,
    /// Replaces the environment's host, mainly for local testing.
    pub base_url_override: Option<String>,
}

impl AppStoreCredentials {
    pub fn base_url(&self) -> &str {
        self.base_url_override
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
    }
}

impl std::fmt::Debug for AppStoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStoreCredentials")
            .field("issuer_id", &self.issuer_id)
            .field("key_id", &self.key_id)
            .field("private_key_pem", &"<redacted>")
            .field("bundle_id", &self.bundle_id)
            .field("environment", &self.environment)
            .field("base_url_override", &self.base_url_override)
            .finish()
    }
}

/// Deployment identity echoed in diagnostic response headers.
#[derive(Clone, Debug, Default)]
pub struct ServiceIdentity {
    pub name: Option<String>,
    pub stage: Option<String>,
    pub function_name: Option<String>,
}

/// Configuration for the whole gateway.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// HS256 secret for user access tokens.
    pub jwt_secret: Option<String>,
    /// Grant `ai:chat` to every issued token without an entitlement check.
    pub bypass_premium: bool,
    pub app_store: Option<AppStoreCredentials>,
    pub limits: ChatLimits,
    pub upstream: UpstreamConfig,
    pub service: ServiceIdentity,
    /// Execution budget the hosting runtime grants each invocation.
    pub invocation_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            bypass_premium: false,
            app_store: None,
            limits: ChatLimits::default(),
            upstream: UpstreamConfig::default(),
            service: ServiceIdentity::default(),
            invocation_timeout_ms: 30_000,
        }
    }
}

impl GatewayConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                      | Default                          |
    /// |-------------------------------|----------------------------------|
    /// | `JWT_SECRET`                  | none                             |
    /// | `OPENAI_API_KEY`              | none                             |
    /// | `UPSTREAM_URL`                | OpenAI chat completions endpoint |
    /// | `UPSTREAM_MAX_RETRIES`        | `3`                              |
    /// | `MAX_PAYLOAD_BYTES`           | `200000`                         |
    /// | `MAX_MESSAGES`                | `50`                             |
    /// | `MAX_MESSAGE_CHARS`           | `4000`                           |
    /// | `DEFAULT_MAX_TOKENS`          | `400`                            |
    /// | `DEFAULT_MODEL`               | `gpt-4o-mini`                    |
    /// | `ALLOWED_MODELS`              | empty (any model)                |
    /// | `BYPASS_PREMIUM`              | off                              |
    /// | `APPSTORE_*`                  | none (entitlement always false)  |
    /// | `SVC_NAME` / `SVC_STAGE`      | none                             |
    /// | `AWS_LAMBDA_FUNCTION_NAME`    | none                             |
    /// | `INVOCATION_TIMEOUT_MS`       | `30000`                          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let limits = ChatLimits {
            max_messages: parse_or(&get, "MAX_MESSAGES", defaults.limits.max_messages)?,
            max_message_chars: parse_or(
                &get,
                "MAX_MESSAGE_CHARS",
                defaults.limits.max_message_chars,
            )?,
            default_max_tokens: parse_or(
                &get,
                "DEFAULT_MAX_TOKENS",
                defaults.limits.default_max_tokens,
            )?,
            default_model: get("DEFAULT_MODEL").unwrap_or(defaults.limits.default_model),
            allowed_models: get("ALLOWED_MODELS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
        };

        let upstream = UpstreamConfig {
            url: get("UPSTREAM_URL").unwrap_or(defaults.upstream.url),
            api_key: get("OPENAI_API_KEY"),
            max_retries: parse_or(&get, "UPSTREAM_MAX_RETRIES", defaults.upstream.max_retries)?,
            max_payload_bytes: parse_or(
                &get,
                "MAX_PAYLOAD_BYTES",
                defaults.upstream.max_payload_bytes,
            )?,
        };

        Ok(Self {
            jwt_secret: get("JWT_SECRET"),
            bypass_premium: get("BYPASS_PREMIUM").is_some_and(|v| is_truthy(&v)),
            app_store: app_store_from(&get),
            limits,
            upstream,
            service: ServiceIdentity {
                name: get("SVC_NAME"),
                stage: get("SVC_STAGE"),
                function_name: get("AWS_LAMBDA_FUNCTION_NAME"),
            },
            invocation_timeout_ms: parse_or(
                &get,
                "INVOCATION_TIMEOUT_MS",
                defaults.invocation_timeout_ms,
            )?,
        })
    }
}

/// App Store credentials are all-or-nothing: a partial set disables lookups.
///
/// Unusable key material disables lookups too; the gateway still starts and
/// every entitlement check answers "not entitled".
fn app_store_from<G>(get: &G) -> Option<AppStoreCredentials>
where
    G: Fn(&str) -> Option<String>,
{
    let (Some(issuer_id), Some(key_id), Some(key_b64)) = (
        get("APPSTORE_ISSUER_ID"),
        get("APPSTORE_KEY_ID"),
        get("APPSTORE_PRIVATE_KEY_B64"),
    ) else {
        return None;
    };

    let private_key_pem = base64::engine::general_purpose::STANDARD
        .decode(key_b64.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    let Some(private_key_pem) = private_key_pem else {
        warn!("APPSTORE_PRIVATE_KEY_B64 is not base64-encoded PEM; subscription lookups disabled");
        return None;
    };

    Some(AppStoreCredentials {
        issuer_id,
        key_id,
        private_key_pem,
        bundle_id: get("APPSTORE_BUNDLE_ID"),
        environment: get("APPSTORE_ENV")
            .map(|v| AppStoreEnvironment::parse(&v))
            .unwrap_or(AppStoreEnvironment::Production),
        base_url_override: get("APPSTORE_BASE_URL"),
    })
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
