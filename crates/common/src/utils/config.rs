use ::config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::{GatewayError, Result};

/// Separator between nested keys in environment variables,
/// e.g. `HLGATE__UPSTREAM__URL` maps to `upstream.url`.
pub const ENV_SEPARATOR: &str = "__";

/// Loads configuration into a struct.
///
/// Sources are layered: struct defaults (via `#[serde(default)]`), then the
/// optional file (TOML, YAML, JSON, etc. based on file extension), then
/// environment variables carrying `env_prefix`.
pub fn load_config<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> Result<T> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        let path_str = path
            .to_str()
            .ok_or_else(|| GatewayError::Config(format!("Invalid config path: {:?}", path)))?;
        builder = builder.add_source(File::with_name(path_str));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(env_prefix)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default)]
        name: String,
        #[serde(default)]
        inner: Inner,
    }

    #[derive(Debug, Default, Deserialize)]
    struct Inner {
        #[serde(default)]
        port: u16,
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "name = \"gateway\"\n[inner]\nport = 8080").unwrap();

        let sample: Sample = load_config(Some(file.path()), "HLGATE_TEST_FILE").unwrap();
        assert_eq!(sample.name, "gateway");
        assert_eq!(sample.inner.port, 8080);
    }

    #[test]
    fn test_defaults_without_file() {
        let sample: Sample = load_config(None, "HLGATE_TEST_NOFILE").unwrap();
        assert_eq!(sample.name, "");
        assert_eq!(sample.inner.port, 0);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result: Result<Sample> = load_config(
            Some(Path::new("/definitely/not/here/gateway.toml")),
            "HLGATE_TEST_MISSING",
        );
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_type_mismatch_is_config_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[inner]\nport = \"not a port\"").unwrap();

        let result: Result<Sample> = load_config(Some(file.path()), "HLGATE_TEST_MISMATCH");
        match result {
            Err(GatewayError::Config(message)) => assert!(message.contains("port")),
            other => panic!("expected a config error, got {:?}", other),
        }
    }
}
