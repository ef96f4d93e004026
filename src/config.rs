use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::storage::expand_tilde;
use crate::auth::{Credential, LoginCredentials, OAuthClient, TargetContext, TokenFile};
use crate::error::ClientError;
use crate::transport::{PinnedRootsPolicy, ProxyConfig, TransportSettings};

// ==================================================================================================
// Library configuration
// ==================================================================================================

/// Organization and space the client starts out targeting
#[derive(Debug, Clone, Default, PartialEq)]
pub enum InitialTarget {
    #[default]
    None,
    /// Already resolved objects
    Context(TargetContext),
    /// Names, resolved after the first successful login
    Names {
        organization: String,
        space: Option<String>,
    },
}

/// Everything a [`crate::CloudControllerClient`] is built from
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Controller API base URL, e.g. `https://api.example.com`
    pub controller_url: String,

    pub transport: TransportSettings,

    /// OAuth client for the token endpoint (default `cf` with an empty secret)
    pub oauth_client: OAuthClient,

    /// Exchanged for a token by `login()`
    pub login: Option<LoginCredentials>,

    /// Token to start with, e.g. loaded from the token file
    pub credential: Option<Credential>,

    pub target: InitialTarget,

    /// Login server base URL; discovered from `/v2/info` when `None`
    pub token_endpoint: Option<String>,

    /// Refresh tokens expiring within this window before using them
    pub refresh_threshold: Duration,

    /// How long the `/v2/info` document is cached
    pub info_ttl: Duration,
}

impl ClientConfig {
    pub fn new(controller_url: impl Into<String>) -> Self {
        Self {
            controller_url: controller_url.into(),
            transport: TransportSettings::default(),
            oauth_client: OAuthClient::default(),
            login: None,
            credential: None,
            target: InitialTarget::None,
            token_endpoint: None,
            refresh_threshold: Duration::from_secs(300),
            info_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_login(mut self, login: LoginCredentials) -> Self {
        self.login = Some(login);
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_target(mut self, target: TargetContext) -> Self {
        self.target = InitialTarget::Context(target);
        self
    }

    pub fn with_target_names(mut self, organization: impl Into<String>, space: Option<String>) -> Self {
        self.target = InitialTarget::Names {
            organization: organization.into(),
            space,
        };
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.transport.proxy = Some(proxy);
        self
    }

    pub fn with_token_endpoint(mut self, url: impl Into<String>) -> Self {
        self.token_endpoint = Some(url.into());
        self
    }

    /// Reject settings that can never work
    pub fn validate(&self) -> std::result::Result<(), ClientError> {
        let url = url::Url::parse(&self.controller_url).map_err(|e| {
            ClientError::Configuration(format!(
                "Invalid controller URL {}: {}",
                self.controller_url, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Configuration(format!(
                "Controller URL must be http or https: {}",
                self.controller_url
            )));
        }
        if let Some(endpoint) = &self.token_endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                ClientError::Configuration(format!("Invalid token endpoint {}: {}", endpoint, e))
            })?;
        }
        Ok(())
    }
}

// ==================================================================================================
// Command line
// ==================================================================================================

/// cfc - Cloud Controller command line client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Controller API URL
    #[arg(short = 'a', long, env = "CF_API")]
    pub api: Option<String>,

    /// User name for login
    #[arg(short = 'u', long, env = "CF_USERNAME")]
    pub username: Option<String>,

    /// Password for login (prompted when missing)
    #[arg(short = 'p', long, env = "CF_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Organization to target
    #[arg(short = 'o', long, env = "CF_ORG")]
    pub org: Option<String>,

    /// Space to target
    #[arg(short = 's', long, env = "CF_SPACE")]
    pub space: Option<String>,

    /// HTTP proxy host
    #[arg(long, env = "CF_PROXY_HOST")]
    pub proxy_host: Option<String>,

    /// HTTP proxy port
    #[arg(long, env = "CF_PROXY_PORT")]
    pub proxy_port: Option<u16>,

    /// PEM file with trusted root certificates; certificates are not verified without it
    #[arg(long, env = "CF_CA_CERT")]
    pub ca_cert: Option<String>,

    /// Token file location
    #[arg(long, env = "CF_TOKEN_FILE")]
    pub token_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "30")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "300")]
    pub http_timeout: u64,

    /// Print per-request statistics on exit
    #[arg(long)]
    pub stats: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show controller information
    Info,
    /// Log in and remember the token
    Login,
    /// Forget the stored token
    Logout,
    /// Target an organization and space
    Target { org: String, space: Option<String> },
    /// List applications in the target space
    Apps,
    /// Start an application in the target space
    Start { app: String },
    /// Stop an application in the target space
    Stop { app: String },
    /// Restart an application in the target space
    Restart { app: String },
    /// Delete an application in the target space
    Delete { app: String },
    /// Print a file from an application instance
    File {
        app: String,
        path: String,
        #[arg(short, long, default_value = "0")]
        instance: u32,
        /// First byte to read
        #[arg(long, allow_negative_numbers = true)]
        start: Option<i64>,
        /// Byte after the last one to read
        #[arg(long, allow_negative_numbers = true)]
        end: Option<i64>,
        /// Read only the last N bytes
        #[arg(long, allow_negative_numbers = true, conflicts_with_all = ["start", "end"])]
        tail: Option<i64>,
    },
    /// Print the logs of an application instance
    Logs {
        app: String,
        #[arg(short, long, default_value = "0")]
        instance: u32,
    },
    /// Change the password of the logged-in user
    Passwd,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub controller_url: String,

    // Login
    pub username: Option<String>,
    pub password: Option<String>,
    pub org: Option<String>,
    pub space: Option<String>,

    // Transport
    pub proxy: Option<ProxyConfig>,
    pub ca_cert: Option<PathBuf>,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Session
    pub token_file: PathBuf,
    pub token_refresh_threshold: u64,
    pub token_endpoint: Option<String>,

    pub log_level: String,
    pub show_stats: bool,
    pub command: Command,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let proxy = match (args.proxy_host, args.proxy_port) {
            (Some(host), Some(port)) => Some(ProxyConfig::new(host, port)),
            (Some(_), None) => anyhow::bail!("CF_PROXY_PORT is required when CF_PROXY_HOST is set"),
            (None, Some(_)) => anyhow::bail!("CF_PROXY_HOST is required when CF_PROXY_PORT is set"),
            (None, None) => None,
        };

        let token_file = match args.token_file {
            Some(path) => expand_tilde(&path),
            None => TokenFile::default_path()
                .context("Cannot locate home directory; set CF_TOKEN_FILE")?,
        };

        Ok(Config {
            controller_url: args
                .api
                .context("CF_API is required (use -a or set CF_API env var)")?,
            username: args.username,
            password: args.password,
            org: args.org,
            space: args.space,
            proxy,
            ca_cert: args.ca_cert.map(|s| expand_tilde(&s)),
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
            token_file,
            token_refresh_threshold: std::env::var("TOKEN_REFRESH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            token_endpoint: std::env::var("CF_TOKEN_ENDPOINT").ok(),
            log_level: args.log_level,
            show_stats: args.stats,
            command: args.command,
        })
    }

    /// Library configuration for this invocation
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut transport = TransportSettings {
            proxy: self.proxy.clone(),
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
            ..TransportSettings::default()
        };
        if let Some(ca_cert) = &self.ca_cert {
            let policy = PinnedRootsPolicy::from_pem_file(ca_cert)
                .with_context(|| format!("Failed to load CA certificates from {}", ca_cert.display()))?;
            transport.trust_policy = Arc::new(policy);
        }

        let mut config = ClientConfig::new(self.controller_url.clone());
        config.transport = transport;
        config.token_endpoint = self.token_endpoint.clone();
        config.refresh_threshold = Duration::from_secs(self.token_refresh_threshold);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            config.login = Some(LoginCredentials::password(username, password));
        }
        config.validate()?;
        Ok(config)
    }
}
