use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::WorkerConfig;
use crate::error::ConfigError;
use crate::secrets;

/// Optional JSON file read before environment overrides are applied.
pub const CONFIG_FILE_VAR: &str = "ANALYSIS_CONFIG_FILE";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<WorkerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses a JSON config without validating it; environment overrides may
/// still supply required settings.
pub fn load_config_from_str(content: &str) -> Result<WorkerConfig, ConfigError> {
    Ok(serde_json::from_str(content)?)
}

/// Loads and validates config from the process environment.
pub fn load_from_env() -> Result<WorkerConfig, ConfigError> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    load_from_vars(&vars)
}

/// Same as [`load_from_env`] with an explicit variable map.
pub fn load_from_vars(vars: &HashMap<String, String>) -> Result<WorkerConfig, ConfigError> {
    let mut config = match lookup(vars, CONFIG_FILE_VAR) {
        Some(path) => load_config(path)?,
        None => WorkerConfig::default(),
    };

    apply_overrides(&mut config, vars)?;
    resolve_secrets(&mut config, vars)?;
    validate_config(&config)?;

    Ok(config)
}

/// Non-empty value of `name`.
fn lookup<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    vars.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn set_string(vars: &HashMap<String, String>, name: &str, target: &mut String) {
    if let Some(value) = lookup(vars, name) {
        *target = value.to_string();
    }
}

fn set_optional(vars: &HashMap<String, String>, name: &str, target: &mut Option<String>) {
    if let Some(value) = lookup(vars, name) {
        *target = Some(value.to_string());
    }
}

fn set_path(vars: &HashMap<String, String>, name: &str, target: &mut Option<PathBuf>) {
    if let Some(value) = lookup(vars, name) {
        *target = Some(PathBuf::from(value));
    }
}

fn set_parsed<T>(vars: &HashMap<String, String>, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = lookup(vars, name) {
        *target = value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name: name.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn set_bool(vars: &HashMap<String, String>, name: &str, target: &mut bool) -> Result<(), ConfigError> {
    if let Some(value) = lookup(vars, name) {
        *target = match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(ConfigError::Invalid {
                    name: name.to_string(),
                    value: value.to_string(),
                    reason: "expected a boolean".to_string(),
                })
            }
        };
    }
    Ok(())
}

fn apply_overrides(
    config: &mut WorkerConfig,
    vars: &HashMap<String, String>,
) -> Result<(), ConfigError> {
    set_string(vars, "GOOGLE_PROJECT_ID", &mut config.project_id);
    set_string(vars, "BIGQUERY_DATASET", &mut config.dataset);
    set_string(vars, "GCS_BUCKET", &mut config.bucket);
    set_string(vars, "PUBSUB_SUBSCRIPTION", &mut config.subscription);
    set_string(vars, "PINECONE_INDEX", &mut config.vector_index);
    set_optional(vars, "PINECONE_HOST", &mut config.vector_host);
    set_string(vars, "INFERENCE_ENDPOINT", &mut config.inference_endpoint);
    set_string(vars, "LLM_ENDPOINT", &mut config.llm_endpoint);
    set_string(vars, "LLM_MODEL", &mut config.llm_model);
    set_string(vars, "ANALYSIS_EMBEDDING_MODEL", &mut config.embedding_model);

    if let Some(host) = lookup(vars, "PUBSUB_EMULATOR_HOST") {
        config.pubsub_endpoint = Some(emulator_url(host));
    }
    if let Some(host) = lookup(vars, "STORAGE_EMULATOR_HOST") {
        config.storage_endpoint = Some(emulator_url(host));
    }
    if let Some(host) = lookup(vars, "BIGQUERY_EMULATOR_HOST") {
        config.bigquery_endpoint = Some(emulator_url(host));
    }
    set_parsed(vars, "ANALYSIS_METADATA_BACKEND", &mut config.metadata_backend)?;

    set_path(vars, "ANALYSIS_BLOB_ROOT", &mut config.blob_root);
    set_path(vars, "ANALYSIS_DATABASE_PATH", &mut config.database_path);
    set_path(vars, "ANALYSIS_SCRATCH_DIR", &mut config.scratch_dir);
    if let Some(path) = lookup(vars, "ANALYSIS_FFMPEG_PATH") {
        config.ffmpeg_path = PathBuf::from(path);
    }

    set_parsed(vars, "ANALYSIS_TARGET_FPS", &mut config.target_fps)?;
    set_parsed(vars, "ANALYSIS_MAX_SECONDS", &mut config.max_seconds)?;
    set_parsed(vars, "ANALYSIS_EMBEDDING_DIM", &mut config.embedding_dim)?;
    set_parsed(vars, "ANALYSIS_STAGE_TIMEOUT_SECS", &mut config.stage_timeout_secs)?;
    set_parsed(vars, "ANALYSIS_ACQUIRE_TIMEOUT_SECS", &mut config.acquire_timeout_secs)?;
    set_parsed(vars, "ANALYSIS_EXTRACT_TIMEOUT_SECS", &mut config.extract_timeout_secs)?;
    set_parsed(vars, "ANALYSIS_ACK_DEADLINE_SECS", &mut config.ack_deadline_secs)?;
    set_parsed(vars, "ANALYSIS_WORKER_CONCURRENCY", &mut config.concurrency)?;
    set_parsed(vars, "ANALYSIS_POLL_INTERVAL_MS", &mut config.poll_interval_ms)?;
    set_parsed(vars, "ANALYSIS_STATUS_RETRIES", &mut config.status_retries)?;
    set_parsed(
        vars,
        "ANALYSIS_STATUS_RETRY_BACKOFF_MS",
        &mut config.status_retry_backoff_ms,
    )?;
    set_parsed(vars, "ANALYSIS_ACK_POLICY", &mut config.ack_policy)?;
    set_bool(vars, "ANALYSIS_SKIP_COMPLETED", &mut config.skip_completed)?;
    set_parsed(vars, "ANALYSIS_SEGMENTER", &mut config.segmenter)?;
    set_parsed(vars, "ANALYSIS_LOG_FORMAT", &mut config.log_format)?;

    Ok(())
}

/// Emulator variables hold `host:port` without a scheme.
fn emulator_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

fn resolve_secrets(
    config: &mut WorkerConfig,
    vars: &HashMap<String, String>,
) -> Result<(), ConfigError> {
    let secret = |name: &str| {
        secrets::resolve_secret_optional(
            lookup(vars, name),
            lookup(vars, &format!("{}_FILE", name)),
        )
    };

    config.secrets.pinecone_api_key = secret("PINECONE_API_KEY")?;
    config.secrets.google_access_token = secret("GOOGLE_ACCESS_TOKEN")?;
    config.secrets.llm_api_key = secret("LLM_API_KEY")?;
    config.secrets.inference_api_key = secret("INFERENCE_API_KEY")?;
    Ok(())
}

fn validate_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.project_id.trim().is_empty() {
        return Err(ConfigError::Missing {
            name: "GOOGLE_PROJECT_ID".to_string(),
        });
    }
    if config.inference_endpoint.trim().is_empty() {
        return Err(ConfigError::Missing {
            name: "INFERENCE_ENDPOINT".to_string(),
        });
    }
    if config.vector_host.is_none() {
        return Err(ConfigError::Missing {
            name: "PINECONE_HOST".to_string(),
        });
    }
    if config.secrets.pinecone_api_key.is_none() {
        return Err(ConfigError::Missing {
            name: "PINECONE_API_KEY".to_string(),
        });
    }

    if !config.target_fps.is_finite() || config.target_fps <= 0.0 {
        return Err(ConfigError::Validation {
            message: format!("target FPS must be positive, got {}", config.target_fps),
        });
    }
    if config.max_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "max seconds must be at least 1".to_string(),
        });
    }
    if config.embedding_dim == 0 {
        return Err(ConfigError::Validation {
            message: "embedding dimension must be at least 1".to_string(),
        });
    }
    if config.concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "worker concurrency must be at least 1".to_string(),
        });
    }
    for (name, secs) in [
        ("stage", config.stage_timeout_secs),
        ("acquire", config.acquire_timeout_secs),
        ("extract", config.extract_timeout_secs),
    ] {
        if secs == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} timeout must be at least 1 second", name),
            });
        }
    }
    if config.ack_deadline_secs < 10 {
        return Err(ConfigError::Validation {
            message: format!(
                "ack deadline must be at least 10 seconds, got {}",
                config.ack_deadline_secs
            ),
        });
    }

    Ok(())
}
