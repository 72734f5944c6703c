use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

fn default_body_limit() -> usize {
    10 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where the model artifact comes from and where it is cached.
///
/// `artifact_id` has no default on purpose: without it the service has no
/// model to serve, so deserialization fails and startup aborts.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub artifact_base_url: String,
    pub artifact_id: String,
    pub cache_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(5)
}

impl ModelConfig {
    pub fn get_artifact_url(&self) -> String {
        format!(
            "{}/{}.tar.gz",
            self.artifact_base_url.trim_end_matches('/'),
            self.artifact_id
        )
    }

    pub fn get_artifact_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.artifact_id)
    }

    pub fn get_archive_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.tar.gz", self.artifact_id))
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = config.try_deserialize::<Config>()?;

    Ok(config)
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_config() -> ModelConfig {
        ModelConfig {
            artifact_base_url: "https://models.example.com/artifacts/".to_string(),
            artifact_id: "vit-ai-image-detector".to_string(),
            cache_dir: PathBuf::from(".cache/models"),
            num_instances: 2,
        }
    }

    #[test]
    fn artifact_url_joins_without_double_slash() {
        let config = model_config();
        assert_eq!(
            config.get_artifact_url(),
            "https://models.example.com/artifacts/vit-ai-image-detector.tar.gz"
        );
    }

    #[test]
    fn artifact_paths_live_under_cache_dir() {
        let config = model_config();
        assert_eq!(
            config.get_artifact_dir(),
            PathBuf::from(".cache/models/vit-ai-image-detector")
        );
        assert_eq!(
            config.get_archive_path(),
            PathBuf::from(".cache/models/vit-ai-image-detector.tar.gz")
        );
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert!(matches!(
            LogLevel::try_from("DEBUG".to_string()),
            Ok(LogLevel::Debug)
        ));
        assert!(matches!(
            LogLevel::try_from("info".to_string()),
            Ok(LogLevel::Info)
        ));
        assert!(LogLevel::try_from("trace".to_string()).is_err());
    }

    #[test]
    fn environment_rejects_unknown_values() {
        assert!(Environment::try_from("staging".to_string()).is_err());
    }
}
