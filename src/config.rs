use clap::Parser;
use rand::RngCore;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "emoshare", about = "A social feed for sharing emotions")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub github: GithubConfig,
    pub store: StoreConfig,
    pub limits: LimitsConfig,
    pub cors: CorsConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_days: i64,
    /// Key used to sign session cookies. Generated per process when empty.
    pub secret_key: String,
}

/// GitHub OAuth application settings.
#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct GithubConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgrest,
    #[default]
    Sqlite,
}

#[derive(Deserialize, Clone, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Base URL of the hosted data store (e.g. `https://xyz.supabase.co`).
    pub url: String,
    pub anon_key: String,
    pub service_role_key: String,
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_emotion_length: usize,
    pub max_comment_length: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CorsConfig {
    pub origins: Vec<String>,
}

const PLACEHOLDER_CLIENT_ID: &str = "your-github-client-id";
const PLACEHOLDER_CLIENT_SECRET: &str = "your-github-client-secret";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "emoshare_session".to_string(),
            session_days: 7,
            secret_key: String::new(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:5000/login/github/authorized".to_string(),
            scope: "user:email".to_string(),
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            api_base: "https://api.github.com".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_emotion_length: 200,
            max_comment_length: 500,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec![
                "http://localhost:5000".to_string(),
                "http://127.0.0.1:5000".to_string(),
            ],
        }
    }
}

// Secrets stay out of Debug output so config can be logged safely.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("cookie_name", &self.cookie_name)
            .field("session_days", &self.session_days)
            .field("secret_key", &redacted(&self.secret_key))
            .finish()
    }
}

impl fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(&self.client_secret))
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("url", &self.url)
            .field("anon_key", &redacted(&self.anon_key))
            .field("service_role_key", &redacted(&self.service_role_key))
            .field("path", &self.path)
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl GithubConfig {
    /// Fails when the client id or secret is missing or still a placeholder.
    pub fn check_configured(&self) -> Result<(), &'static str> {
        let id = self.client_id.trim();
        if id.is_empty() || id == PLACEHOLDER_CLIENT_ID {
            return Err("GitHub client id is not configured");
        }
        let secret = self.client_secret.trim();
        if secret.is_empty() || secret == PLACEHOLDER_CLIENT_SECRET {
            return Err("GitHub client secret is not configured");
        }
        Ok(())
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        if config.store.path.is_none() {
            config.store.path = Some(data_dir.join("emoshare.db"));
        }

        if config.auth.secret_key.is_empty() {
            tracing::warn!("SECRET_KEY not set; sessions will not survive a restart");
            config.auth.secret_key = random_secret();
        }

        Ok(config)
    }

    /// Apply environment overrides. `lookup` abstracts over the process
    /// environment so tests can supply their own values.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SECRET_KEY") {
            self.auth.secret_key = v;
        }
        if let Some(v) = lookup("GITHUB_CLIENT_ID") {
            self.github.client_id = v;
        }
        if let Some(v) = lookup("GITHUB_CLIENT_SECRET") {
            self.github.client_secret = v;
        }
        if let Some(v) = lookup("GITHUB_REDIRECT_URI") {
            self.github.redirect_uri = v;
        }
        if let Some(v) = lookup("STORE_BACKEND") {
            self.store.backend = match v.to_ascii_lowercase().as_str() {
                "postgrest" | "supabase" => StoreBackend::Postgrest,
                "sqlite" => StoreBackend::Sqlite,
                other => anyhow::bail!("unknown STORE_BACKEND: {other}"),
            };
        }
        if let Some(v) = lookup("SUPABASE_URL") {
            self.store.url = v;
        }
        if let Some(v) = lookup("SUPABASE_ANON_KEY") {
            self.store.anon_key = v;
        }
        if let Some(v) = lookup("SUPABASE_SERVICE_ROLE_KEY") {
            self.store.service_role_key = v;
        }
        if let Some(v) = lookup("MAX_EMOTION_LENGTH") {
            self.limits.max_emotion_length = v.parse()?;
        }
        if let Some(v) = lookup("COMMENT_MAX_LENGTH") {
            self.limits.max_comment_length = v.parse()?;
        }
        if let Some(v) = lookup("CORS_ORIGINS") {
            self.cors.origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(())
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".emoshare")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("emoshare.db"))
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cli(data_dir: PathBuf) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir: Some(data_dir),
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.auth.cookie_name, "emoshare_session");
        assert_eq!(config.auth.session_days, 7);
        assert_eq!(config.limits.max_emotion_length, 200);
        assert_eq!(config.limits.max_comment_length, 500);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert!(config.store.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli(PathBuf::from("/tmp/test-emoshare"));
        assert_eq!(Config::data_dir(&cli), PathBuf::from("/tmp/test-emoshare"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli(tmp.path().to_path_buf())).unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.db_path(), tmp.path().join("emoshare.db"));
        assert!(!config.auth.secret_key.is_empty());
    }

    #[test]
    fn load_reads_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
host = "127.0.0.1"
port = 9000

[limits]
max_comment_length = 280

[github]
client_id = "abc"
"#,
        )
        .unwrap();

        let mut cli = cli(tmp.path().to_path_buf());
        cli.config = Some(config_path);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.limits.max_comment_length, 280);
        assert_eq!(config.limits.max_emotion_length, 200);
        assert_eq!(config.github.client_id, "abc");
    }

    #[test]
    fn cli_overrides_beat_toml_values() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "[server]\nport = 9000\n").unwrap();

        let mut cli = cli(tmp.path().to_path_buf());
        cli.config = Some(config_path);
        cli.port = Some(4000);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GITHUB_CLIENT_SECRET", "s3cret"),
            ("STORE_BACKEND", "supabase"),
            ("SUPABASE_URL", "https://db.example.com"),
            ("COMMENT_MAX_LENGTH", "120"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
        ]);
        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.github.client_secret, "s3cret");
        assert_eq!(config.store.backend, StoreBackend::Postgrest);
        assert_eq!(config.store.url, "https://db.example.com");
        assert_eq!(config.limits.max_comment_length, 120);
        assert_eq!(
            config.cors.origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn unknown_store_backend_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_env(|k| (k == "STORE_BACKEND").then(|| "mongo".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn placeholder_credentials_are_not_configured() {
        let mut github = GithubConfig {
            client_id: "your-github-client-id".into(),
            client_secret: "real".into(),
            ..GithubConfig::default()
        };
        assert!(github.check_configured().is_err());

        github.client_id = "Iv1.abc".into();
        github.client_secret = "   ".into();
        assert!(github.check_configured().is_err());

        github.client_secret = "your-github-client-secret".into();
        assert!(github.check_configured().is_err());

        github.client_secret = "0123456789abcdef".into();
        assert!(github.check_configured().is_ok());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut config = Config::default();
        config.github.client_secret = "super-secret-value".into();
        config.store.service_role_key = "service-role-key-value".into();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-value"));
        assert!(!rendered.contains("service-role-key-value"));
    }
}
