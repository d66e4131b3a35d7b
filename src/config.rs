use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Address the interception proxy listens on
  pub listen: SocketAddr,
  /// Database file (defaults to $XDG_DATA_HOME/reviewrelay/relay.db)
  pub database: Option<PathBuf>,
  /// Directory for rolling log files (defaults to the platform cache dir)
  pub log_dir: Option<PathBuf>,
  pub upstream: UpstreamConfig,
  pub regions: RegionsConfig,
  pub shell: ShellConfig,
  pub routes: RoutesConfig,
  pub outbox: OutboxConfig,
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
  /// Origin serving the application shell, images and other static assets
  pub app: Url,
  /// Origin serving the restaurants/reviews API
  pub api: Url,
  /// Per-request timeout handed to the HTTP client
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegionsConfig {
  pub shell: String,
  pub images: String,
  pub map: String,
  /// When set, activation only purges regions whose name starts with this prefix
  pub prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
  /// Paths fetched into the shell region on install
  pub manifest: Vec<String>,
  /// Navigation path -> shell document served for it
  pub pages: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
  pub images: String,
  pub map: String,
  pub listing: String,
  pub reviews: String,
  pub replay: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
  /// A fresh identifier per queued write
  #[default]
  Unique,
  /// The reviewer's name; a second queued review by the same author replaces the first
  Author,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
  pub key_policy: KeyPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// API path probed to decide whether the origin is reachable
  pub probe_path: String,
  pub interval_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
      database: None,
      log_dir: None,
      upstream: UpstreamConfig::default(),
      regions: RegionsConfig::default(),
      shell: ShellConfig::default(),
      routes: RoutesConfig::default(),
      outbox: OutboxConfig::default(),
      connectivity: ConnectivityConfig::default(),
    }
  }
}

impl Default for UpstreamConfig {
  fn default() -> Self {
    Self {
      app: Url::parse("http://localhost:8000/").expect("valid default url"),
      api: Url::parse("http://localhost:1337/").expect("valid default url"),
      timeout_secs: 10,
    }
  }
}

impl Default for RegionsConfig {
  fn default() -> Self {
    Self {
      shell: "static-shell-v1".to_string(),
      images: "images-v1".to_string(),
      map: "map-v1".to_string(),
      prefix: None,
    }
  }
}

impl Default for ShellConfig {
  fn default() -> Self {
    let manifest = ["/index.html", "/restaurant.html", "/restaurant.bundle.js", "/main.bundle.js"]
      .iter()
      .map(|s| s.to_string())
      .collect();
    let pages = [("/", "/index.html"), ("/restaurant.html", "/restaurant.html")]
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    Self { manifest, pages }
  }
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      images: "/img/".to_string(),
      map: "/maps/api/js".to_string(),
      listing: "/restaurants".to_string(),
      reviews: "/reviews".to_string(),
      replay: "/unsent".to_string(),
    }
  }
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_path: "/restaurants".to_string(),
      interval_secs: 30,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./reviewrelay.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/reviewrelay/config.yaml
  ///
  /// Every setting has a default, so no file at all is not an error.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("reviewrelay.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("reviewrelay").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Reject configurations the router cannot tell apart.
  fn validate(&self) -> Result<()> {
    let regions = [&self.regions.shell, &self.regions.images, &self.regions.map];
    for (i, a) in regions.iter().enumerate() {
      if a.is_empty() {
        return Err(eyre!("Region names must not be empty"));
      }
      if regions[i + 1..].contains(a) {
        return Err(eyre!("Region name {} is used for more than one resource class", a));
      }
    }

    let routes = [
      &self.routes.images,
      &self.routes.map,
      &self.routes.listing,
      &self.routes.reviews,
      &self.routes.replay,
    ];
    if let Some(bad) = routes.iter().find(|r| !r.starts_with('/')) {
      return Err(eyre!("Route {} must start with '/'", bad));
    }

    if self.connectivity.interval_secs == 0 {
      return Err(eyre!("connectivity.interval_secs must be at least 1"));
    }

    Ok(())
  }

  /// Regions that survive activation.
  pub fn current_regions(&self) -> Vec<String> {
    vec![
      self.regions.shell.clone(),
      self.regions.images.clone(),
      self.regions.map.clone(),
    ]
  }

  pub fn database_path(&self) -> Option<&Path> {
    self.database.as_deref()
  }

  /// Directory for log files.
  pub fn log_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.log_dir {
      return Ok(dir.clone());
    }
    let cache_dir = dirs::cache_dir().ok_or_else(|| eyre!("Could not find cache directory"))?;
    Ok(cache_dir.join("reviewrelay").join("logs"))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.upstream.timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.connectivity.interval_secs)
  }
}
