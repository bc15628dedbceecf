use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `TOUR_GUIDE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Materialize every registered tour before serving queries.
    #[serde(default = "default_sync_on_startup")]
    pub sync_on_startup: bool,
    /// When false the navigation guard always allows.
    #[serde(default = "default_enforce_navigation")]
    pub enforce_navigation: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

// Default functions
fn default_log_filter() -> String {
    "tour_guide=info,tour_engine=info".to_string()
}
fn default_sync_on_startup() -> bool {
    true
}
fn default_enforce_navigation() -> bool {
    true
}
fn default_initial_capacity() -> usize {
    1024
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_on_startup: default_sync_on_startup(),
            enforce_navigation: default_enforce_navigation(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("TOUR_GUIDE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
