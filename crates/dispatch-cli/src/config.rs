//! Configuration file handling and API key resolution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

const CONFIG_WARNING: &str = "# THIS FILE IS GENERATED. DO NOT EDIT!";

/// Environment-derived endpoints and paths, re-read after `--env-file`
/// loading so file-provided values are honoured.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub bridge_url: String,
    pub bridge_host_header: Option<String>,
    pub console_url: String,
    pub config_path: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            api_url: env_or("DISPATCH_API_URL", "https://api.dispatch.run"),
            bridge_url: env_or("DISPATCH_BRIDGE_URL", "https://bridge.dispatch.run"),
            bridge_host_header: non_empty_env("DISPATCH_BRIDGE_HOST_HEADER"),
            console_url: env_or("DISPATCH_CONSOLE_URL", "https://console.dispatch.run"),
            config_path: config_path(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    non_empty_env(name).unwrap_or_else(|| default.to_string())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

// https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
fn config_path() -> PathBuf {
    if let Some(path) = non_empty_env("DISPATCH_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let base = non_empty_env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| non_empty_env("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("dispatch").join("config.toml")
}

/// The persisted organisation table. Exactly one organisation may be active
/// at a time; its API key is used for all authenticated calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub active: String,

    #[serde(default, rename = "Organizations")]
    pub organizations: BTreeMap<String, Organization>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub api_key: String,
}

impl Config {
    /// Loads the config file; a missing file yields the empty default.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to load configuration from {}", path.display())
                })
            }
        };
        toml::from_str(&raw)
            .with_context(|| format!("failed to load configuration from {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }
        let body = toml::to_string_pretty(self).context("failed to encode configuration")?;
        std::fs::write(path, format!("{CONFIG_WARNING}\n{body}"))
            .with_context(|| format!("failed to create config file {}", path.display()))
    }
}

/// Where the API key in use came from; drives the wording of auth errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeySource {
    Cli,
    Env,
    Config,
}

#[derive(Debug, Clone)]
pub struct ResolvedApiKey {
    pub key: String,
    pub source: ApiKeySource,
}

impl ResolvedApiKey {
    pub fn auth_error_message(&self) -> String {
        let detail = match self.source {
            ApiKeySource::Env => "check DISPATCH_API_KEY environment variable",
            ApiKeySource::Cli => "check the -k,--api-key command-line option",
            ApiKeySource::Config => "please login again using: dispatch login",
        };
        format!("Authentication error when contacting the Dispatch API ({detail})")
    }
}

/// Resolution precedence: `--api-key` flag, then `DISPATCH_API_KEY`, then
/// the active organisation in the config file.
pub fn resolve_api_key(
    cli_key: Option<&str>,
    settings: &Settings,
) -> anyhow::Result<ResolvedApiKey> {
    let config = Config::load(&settings.config_path)?;
    let env_key = non_empty_env("DISPATCH_API_KEY");
    resolve_api_key_from(cli_key, env_key.as_deref(), &config)
}

fn resolve_api_key_from(
    cli_key: Option<&str>,
    env_key: Option<&str>,
    config: &Config,
) -> anyhow::Result<ResolvedApiKey> {
    let mut resolved: Option<ResolvedApiKey> = None;

    if !config.active.is_empty() {
        let Some(organization) = config.organizations.get(&config.active) else {
            bail!(
                "invalid active organization '{}' found in configuration. \
                 Please run `dispatch login` or `dispatch switch`",
                config.active
            );
        };
        resolved = Some(ResolvedApiKey {
            key: organization.api_key.clone(),
            source: ApiKeySource::Config,
        });
    }

    if let Some(key) = env_key.filter(|key| !key.is_empty()) {
        resolved = Some(ResolvedApiKey {
            key: key.to_string(),
            source: ApiKeySource::Env,
        });
    }

    if let Some(key) = cli_key.filter(|key| !key.is_empty()) {
        resolved = Some(ResolvedApiKey {
            key: key.to_string(),
            source: ApiKeySource::Cli,
        });
    }

    match resolved {
        Some(resolved) => Ok(resolved),
        None if !config.organizations.is_empty() => {
            bail!("No organization selected. Please run `dispatch switch` to select one.")
        }
        None => bail!(
            "Please run `dispatch login` to login to Dispatch. Alternatively, set the \
             DISPATCH_API_KEY environment variable, or provide an --api-key (-k) on the \
             command line."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(active: &str, organizations: &[(&str, &str)]) -> Config {
        Config {
            active: active.to_string(),
            organizations: organizations
                .iter()
                .map(|(slug, key)| {
                    (
                        slug.to_string(),
                        Organization {
                            api_key: key.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn round_trips_through_toml_with_warning_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = config_with("acme", &[("acme", "key-1"), ("other", "key-2")]);
        config.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("# THIS FILE IS GENERATED. DO NOT EDIT!\n"));
        assert!(raw.contains("[Organizations.acme]"));

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.active, "acme");
        assert_eq!(loaded.organizations["other"].api_key, "key-2");
    }

    #[test]
    fn missing_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert!(loaded.active.is_empty());
        assert!(loaded.organizations.is_empty());
    }

    #[test]
    fn flag_beats_env_beats_config() {
        let config = config_with("acme", &[("acme", "config-key")]);

        let resolved = resolve_api_key_from(Some("cli-key"), Some("env-key"), &config).unwrap();
        assert_eq!(resolved.key, "cli-key");
        assert_eq!(resolved.source, ApiKeySource::Cli);

        let resolved = resolve_api_key_from(None, Some("env-key"), &config).unwrap();
        assert_eq!(resolved.key, "env-key");
        assert_eq!(resolved.source, ApiKeySource::Env);

        let resolved = resolve_api_key_from(None, None, &config).unwrap();
        assert_eq!(resolved.key, "config-key");
        assert_eq!(resolved.source, ApiKeySource::Config);
    }

    #[test]
    fn invalid_active_organization_is_an_error() {
        let config = config_with("ghost", &[("acme", "key")]);
        let err = resolve_api_key_from(None, None, &config).unwrap_err();
        assert!(err.to_string().contains("invalid active organization"));
    }

    #[test]
    fn missing_key_guidance_depends_on_known_organizations() {
        let err = resolve_api_key_from(None, None, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("dispatch login"));

        let config = config_with("", &[("acme", "key")]);
        let err = resolve_api_key_from(None, None, &config).unwrap_err();
        assert!(err.to_string().contains("dispatch switch"));
    }

    #[test]
    fn auth_error_wording_tracks_key_source() {
        let cases = [
            (ApiKeySource::Env, "DISPATCH_API_KEY"),
            (ApiKeySource::Cli, "--api-key"),
            (ApiKeySource::Config, "dispatch login"),
        ];
        for (source, expected) in cases {
            let resolved = ResolvedApiKey {
                key: "k".to_string(),
                source,
            };
            assert!(resolved.auth_error_message().contains(expected));
        }
    }
}
