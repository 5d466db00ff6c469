use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub jwt_secret: String,
    pub store_backend: StoreBackend,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub routing_url: Option<String>,
    pub json_logs: bool,
    pub staff_radius_meters: f64,
    pub stale_threshold_secs: u64,
    pub emergency_interval_secs: u64,
    pub emergency_distance_meters: f64,
    pub normal_interval_secs: u64,
    pub normal_distance_meters: f64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub http_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "::".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            jwt_secret: "dev-secret".into(),
            store_backend: StoreBackend::Memory,
            redis_url: None,
            database_url: None,
            notify_webhook_url: None,
            routing_url: None,
            json_logs: false,
            staff_radius_meters: 2000.0,
            stale_threshold_secs: 300,
            emergency_interval_secs: 3,
            emergency_distance_meters: 2.0,
            normal_interval_secs: 10,
            normal_distance_meters: 10.0,
            retry_base_ms: 500,
            retry_max_ms: 30_000,
            http_timeout_ms: 5_000,
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    optional(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();
        let defaults = Config::default();

        let store_backend = match optional("STORE_BACKEND").as_deref() {
            Some("redis") => StoreBackend::Redis,
            _ => StoreBackend::Memory,
        };

        Ok(Config {
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            jwt_secret: env::var("JWT_SECRET")?,
            api_base_uri: optional("API_BASE_URI").unwrap_or(defaults.api_base_uri),
            store_backend,
            redis_url: optional("REDIS_URL"),
            database_url: optional("DATABASE_URL"),
            notify_webhook_url: optional("NOTIFY_WEBHOOK_URL"),
            routing_url: optional("ROUTING_URL"),
            json_logs: optional("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            staff_radius_meters: parsed_or("STAFF_RADIUS_METERS", defaults.staff_radius_meters),
            stale_threshold_secs: parsed_or("STALE_THRESHOLD_SECS", defaults.stale_threshold_secs),
            emergency_interval_secs: parsed_or(
                "EMERGENCY_INTERVAL_SECS",
                defaults.emergency_interval_secs,
            ),
            emergency_distance_meters: parsed_or(
                "EMERGENCY_DISTANCE_METERS",
                defaults.emergency_distance_meters,
            ),
            normal_interval_secs: parsed_or("NORMAL_INTERVAL_SECS", defaults.normal_interval_secs),
            normal_distance_meters: parsed_or(
                "NORMAL_DISTANCE_METERS",
                defaults.normal_distance_meters,
            ),
            retry_base_ms: parsed_or("RETRY_BASE_MS", defaults.retry_base_ms),
            retry_max_ms: parsed_or("RETRY_MAX_MS", defaults.retry_max_ms),
            http_timeout_ms: parsed_or("HTTP_TIMEOUT_MS", defaults.http_timeout_ms),
        })
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    /// Bound on every outbound call to the push and routing services.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
