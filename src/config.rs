use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// `config.json`, loaded from next to the binary. See spec §6.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub uuid: String,
    pub port: u16,
    pub sftp: u16,
    pub remote: String,
    pub token: String,
    /// `BASE_SERVER_PATH` — the directory under which every sandbox lives.
    pub path: PathBuf,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.ssl && (self.cert_path.is_none() || self.key_path.is_none()) {
            anyhow::bail!("ssl=true requires both certPath and keyPath");
        }
        Ok(())
    }

    /// Host/port the SFTP server should bind to.
    pub fn sftp_addr(&self) -> String {
        format!("0.0.0.0:{}", self.sftp)
    }

    /// Host/port the HTTP control surface should bind to.
    pub fn http_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ssl: bool) -> String {
        serde_json::json!({
            "uuid": "node-1",
            "port": 8080,
            "sftp": 2022,
            "remote": "https://panel.example.com",
            "token": "secret",
            "path": "/var/lib/dockhand/servers",
            "ssl": ssl,
            "certPath": if ssl { Some("/etc/ssl/cert.pem") } else { None },
            "keyPath": if ssl { Some("/etc/ssl/key.pem") } else { None },
        })
        .to_string()
    }

    #[test]
    fn loads_minimal_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, sample(false)).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.uuid, "node-1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.sftp, 2022);
        assert!(!config.ssl);
    }

    #[test]
    fn ssl_without_cert_paths_fails_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "uuid": "node-1", "port": 8080, "sftp": 2022,
                "remote": "https://panel.example.com", "token": "secret",
                "path": "/srv", "ssl": true,
            })
            .to_string(),
        )
        .unwrap();

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn ssl_with_cert_paths_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, sample(true)).unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.ssl);
        assert!(config.cert_path.is_some());
    }

    #[test]
    fn missing_file_errors() {
        assert!(Config::load(Path::new("/nonexistent/config.json")).is_err());
    }

    #[test]
    fn addr_helpers_format_correctly() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, sample(false)).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.http_addr(), "0.0.0.0:8080");
        assert_eq!(config.sftp_addr(), "0.0.0.0:2022");
    }
}
