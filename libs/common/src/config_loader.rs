//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables with the given prefix (`__` separates nested keys)
//! 2. Configuration file (format chosen by extension)
//! 3. Serialized defaults

use std::path::Path;

use errors::{ProxyError, ProxyResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Build the figment for `defaults` + optional file + prefixed environment
pub fn layered_figment<T>(defaults: &T, file: Option<&Path>, env_prefix: &str) -> ProxyResult<Figment>
where
    T: Serialize,
{
    let mut figment = Figment::from(Serialized::defaults(defaults));

    if let Some(path) = file {
        if !path.exists() {
            return Err(ProxyError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let extension = path.extension().and_then(|s| s.to_str()).ok_or_else(|| {
            ProxyError::config("Config file must have an extension".to_string())
        })?;

        figment = match extension {
            "toml" => figment.merge(Toml::file(path)),
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            "json" => figment.merge(Json::file(path)),
            _ => {
                return Err(ProxyError::config(format!(
                    "Unsupported config file format: {}",
                    extension
                )))
            },
        };
        debug!("Merged configuration file {}", path.display());
    }

    Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
}

/// Load `T` from defaults, an optional file and prefixed environment variables
pub fn load_layered<T>(defaults: &T, file: Option<&Path>, env_prefix: &str) -> ProxyResult<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    layered_figment(defaults, file, env_prefix)?
        .extract()
        .map_err(|e| ProxyError::config(format!("Failed to load configuration: {}", e)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        host: String,
        backlog: u32,
        nested: Nested,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Nested {
        grace_ms: u64,
    }

    fn defaults() -> TestConfig {
        TestConfig {
            host: "0.0.0.0".to_string(),
            backlog: 20,
            nested: Nested { grace_ms: 20 },
        }
    }

    #[test]
    fn test_defaults_only() {
        let config: TestConfig = load_layered(&defaults(), None, "CFGLOADER_NONE_").unwrap();
        assert_eq!(config, defaults());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "backlog: 5\nnested:\n  grace_ms: 50").unwrap();

        let config: TestConfig =
            load_layered(&defaults(), Some(file.path()), "CFGLOADER_YAML_").unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.backlog, 5);
        assert_eq!(config.nested.grace_ms, 50);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = load_layered(&defaults(), Some(file.path()), "CFGLOADER_INI_").unwrap_err();
        assert!(err.to_string().contains("Unsupported config file format"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_layered(
            &defaults(),
            Some(Path::new("/nonexistent/i2cproxy.yaml")),
            "CFGLOADER_MISSING_",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("proxy.toml", "backlog = 7")?;
            jail.set_env("CFGLOADER_ENV_BACKLOG", "9");
            jail.set_env("CFGLOADER_ENV_NESTED__GRACE_MS", "33");

            let config: TestConfig = load_layered(
                &defaults(),
                Some(Path::new("proxy.toml")),
                "CFGLOADER_ENV_",
            )
            .map_err(|e| e.to_string())?;
            assert_eq!(config.backlog, 9);
            assert_eq!(config.nested.grace_ms, 33);
            Ok(())
        });
    }
}
