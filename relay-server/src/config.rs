use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Address pages connect to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Channel address of the wallet service
    pub service: String,
}

fn default_listen() -> String {
    "127.0.0.1:9091".to_string()
}

impl ConfigFile {
    pub fn load(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn validate(&self) -> Result<()> {
        self.relay
            .listen
            .parse::<SocketAddr>()
            .context(format!("Invalid relay.listen address: {}", self.relay.listen))?;
        if self.relay.service.trim().is_empty() {
            anyhow::bail!("relay.service must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_with_default_listen() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[relay]\nservice = \"127.0.0.1:9100\"").unwrap();

        let config = ConfigFile::load(file.path().to_str().unwrap()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.relay.listen, "127.0.0.1:9091");
        assert_eq!(config.relay.service, "127.0.0.1:9100");
    }

    #[test]
    fn test_invalid_listen_is_rejected() {
        let config = ConfigFile::parse(
            "[relay]\nlisten = \"not-an-address\"\nservice = \"127.0.0.1:9100\"",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = ConfigFile::load("/nonexistent/relay.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
