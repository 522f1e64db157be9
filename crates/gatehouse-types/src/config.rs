/// Runtime configuration, loaded from a single YAML document.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listen port. Defaults to 8080 when absent or zero.
    #[serde(default)]
    pub port: u16,
    /// Shared bearer token for the HTTP surface. Empty disables
    /// authentication (suitable only for localhost).
    #[serde(default)]
    pub auth_token: String,
    /// The upstream MCP servers to launch.
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
}

/// One upstream MCP server, launched as a child process over stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Unique name. Used as the namespace prefix in the aggregated view.
    pub name: String,
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child. Inherited when absent.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Extra `KEY=VALUE` environment entries, applied on top of the
    /// inherited parent environment.
    #[serde(default)]
    pub env: Vec<String>,
    /// When true, calls to this upstream skip the approval gate.
    #[serde(default)]
    pub auto_approve: bool,
}

impl UpstreamConfig {
    /// Split the configured `KEY=VALUE` entries into pairs. Entries without
    /// a `=` are dropped with a warning.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .filter_map(|entry| match entry.split_once('=') {
                Some((key, value)) => Some((key.to_string(), value.to_string())),
                None => {
                    tracing::warn!(
                        upstream = %self.name,
                        entry = %entry,
                        "ignoring malformed env entry"
                    );
                    None
                }
            })
            .collect()
    }
}

impl GatewayConfig {
    /// Default config file location: `~/.config/gatehouse/config.yaml`,
    /// falling back to `./config.yaml` when the home directory is unknown.
    pub fn default_path() -> PathBuf {
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home)
                .join(".config")
                .join("gatehouse")
                .join("config.yaml"),
            None => PathBuf::from("./config.yaml"),
        }
    }

    /// Read, parse, and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Parse and validate a YAML config document.
    pub fn parse(content: &str) -> Result<Self, GatewayError> {
        let mut config: GatewayConfig = serde_yaml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply defaults and reject invalid documents.
    pub fn validate(&mut self) -> Result<(), GatewayError> {
        if self.port == 0 {
            self.port = 8080;
        }
        if self.upstreams.is_empty() {
            return Err(GatewayError::Config("no upstreams configured".to_string()));
        }
        let mut seen = HashSet::new();
        for upstream in &self.upstreams {
            if upstream.name.is_empty() {
                return Err(GatewayError::Config("upstream missing name".to_string()));
            }
            if upstream.command.is_empty() {
                return Err(GatewayError::Config(format!(
                    "upstream {} missing command",
                    upstream.name
                )));
            }
            if !seen.insert(upstream.name.as_str()) {
                return Err(GatewayError::Config(format!(
                    "duplicate upstream name {}",
                    upstream.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_applies_port_default() {
        let config = GatewayConfig::parse(
            r#"
upstreams:
  - name: echo
    command: /usr/local/bin/echo-server
"#,
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.auth_token.is_empty());
        assert_eq!(config.upstreams.len(), 1);
        assert!(!config.upstreams[0].auto_approve);
    }

    #[test]
    fn parse_full_document() {
        let config = GatewayConfig::parse(
            r#"
port: 9090
auth_token: secret
upstreams:
  - name: files
    command: mcp-files
    args: ["--root", "/tmp"]
    workdir: /tmp
    env: ["API_KEY=abc", "MODE=ro"]
    auto_approve: true
"#,
        )
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.auth_token, "secret");
        let upstream = &config.upstreams[0];
        assert_eq!(upstream.args, vec!["--root", "/tmp"]);
        assert_eq!(
            upstream.env_pairs(),
            vec![
                ("API_KEY".to_string(), "abc".to_string()),
                ("MODE".to_string(), "ro".to_string())
            ]
        );
        assert!(upstream.auto_approve);
    }

    #[test]
    fn rejects_empty_upstreams() {
        let err = GatewayConfig::parse("port: 8080\nupstreams: []\n").unwrap_err();
        assert!(err.to_string().contains("no upstreams"));
    }

    #[test]
    fn rejects_missing_name_and_command() {
        let err = GatewayConfig::parse(
            r#"
upstreams:
  - name: ""
    command: echo
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing name"));

        let err = GatewayConfig::parse(
            r#"
upstreams:
  - name: echo
    command: ""
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing command"));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = GatewayConfig::parse(
            r#"
upstreams:
  - name: echo
    command: a
  - name: echo
    command: b
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate upstream name"));
    }

    #[test]
    fn env_entries_without_separator_are_skipped() {
        let upstream = UpstreamConfig {
            name: "x".into(),
            command: "x".into(),
            args: Vec::new(),
            workdir: None,
            env: vec!["BROKEN".into(), "OK=1".into()],
            auto_approve: false,
        };
        assert_eq!(upstream.env_pairs(), vec![("OK".to_string(), "1".to_string())]);
    }
}
