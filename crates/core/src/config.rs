use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `COURSEFLOW__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// How often the scheduler driver polls for due resumptions.
    #[serde(default = "default_poll_interval_ms")]
    pub scheduler_poll_interval_ms: u64,
    /// Upper bound on steps executed in one synchronous advance, guarding
    /// against miswired branch graphs that cycle.
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: usize,
    #[serde(default = "default_business_hours_start")]
    pub business_hours_start_hour: u32,
    #[serde(default = "default_business_hours_end")]
    pub business_hours_end_hour: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_max_steps_per_run() -> usize {
    100
}
fn default_business_hours_start() -> u32 {
    9
}
fn default_business_hours_end() -> u32 {
    17
}
fn default_from_email() -> String {
    "no-reply@courseflow.example".to_string()
}
fn default_from_name() -> String {
    "CourseFlow".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler_poll_interval_ms: default_poll_interval_ms(),
            max_steps_per_run: default_max_steps_per_run(),
            business_hours_start_hour: default_business_hours_start(),
            business_hours_end_hour: default_business_hours_end(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            from_email: default_from_email(),
            from_name: default_from_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            engine: EngineConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("COURSEFLOW")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
