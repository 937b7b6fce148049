/// Configuration - layered `config.toml` + environment, process-wide singleton.
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::time::Duration;

static GLOBAL_CONFIG: OnceCell<Settings> = OnceCell::new();

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub rpc_url: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_rpc_max_retries")]
    pub rpc_max_retries: u32,
    #[serde(default = "default_rpc_retry_backoff_secs")]
    pub rpc_retry_backoff_secs: u64,
    #[serde(default = "default_rpc_connect_timeout_secs")]
    pub rpc_connect_timeout_secs: u64,

    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    #[serde(default = "default_db_max_conns")]
    pub db_max_conns: u32,
    #[serde(default = "default_db_conn_timeout_secs")]
    pub db_conn_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_conn_lifetime_secs")]
    pub db_conn_lifetime_secs: u64,

    pub backfill_start_height: Option<u64>,
    pub backfill_end_height: Option<u64>,
    #[serde(default = "default_backfill_workers")]
    pub backfill_workers: usize,
    #[serde(default = "default_backfill_batch_size")]
    pub backfill_batch_size: usize,

    #[serde(default = "default_livetail_poll_interval_secs")]
    pub livetail_poll_interval_secs: u64,

    #[serde(default = "default_reorg_max_depth")]
    pub reorg_max_depth: u64,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_metrics_endpoint")]
    pub metrics_endpoint: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_fanout_port")]
    pub fanout_port: u16,
}

fn default_rpc_timeout_secs() -> u64 { 30 }
fn default_rpc_max_retries() -> u32 { 5 }
fn default_rpc_retry_backoff_secs() -> u64 { 1 }
fn default_rpc_connect_timeout_secs() -> u64 { 10 }
fn default_db_port() -> u16 { 5432 }
fn default_db_max_conns() -> u32 { 20 }
fn default_db_conn_timeout_secs() -> u64 { 5 }
fn default_db_idle_timeout_secs() -> u64 { 300 }
fn default_db_conn_lifetime_secs() -> u64 { 1800 }
fn default_backfill_workers() -> usize { 8 }
fn default_backfill_batch_size() -> usize { 100 }
fn default_livetail_poll_interval_secs() -> u64 { 2 }
fn default_reorg_max_depth() -> u64 { 6 }
fn default_metrics_port() -> u16 { 9090 }
fn default_metrics_endpoint() -> String { "/metrics".to_string() }
fn default_log_level() -> String { "INFO".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_fanout_port() -> u16 { 8080 }

impl Settings {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn rpc_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.rpc_retry_backoff_secs)
    }

    pub fn rpc_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_connect_timeout_secs)
    }

    pub fn db_conn_timeout(&self) -> Duration {
        Duration::from_secs(self.db_conn_timeout_secs)
    }

    pub fn db_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.db_idle_timeout_secs)
    }

    pub fn db_conn_lifetime(&self) -> Duration {
        Duration::from_secs(self.db_conn_lifetime_secs)
    }

    pub fn livetail_poll_interval(&self) -> Duration {
        Duration::from_secs(self.livetail_poll_interval_secs)
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}

/// Load settings from an optional `config.toml` overridden by the process
/// environment (spec-named variables such as `RPC_URL`, `DB_HOST`, ... take
/// precedence over file values).
pub fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::default()
                .try_parsing(true)
                .separator("__"),
        );
    let raw = builder.build()?;
    let settings: Settings = raw.try_deserialize()?;
    Ok(settings)
}

pub fn init_global_config() -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings()?;
    GLOBAL_CONFIG
        .set(settings)
        .map_err(|_| "config already initialized")?;
    Ok(())
}

pub fn get_global_config() -> &'static Settings {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_is_assembled_from_parts() {
        let settings = Settings {
            rpc_url: "http://localhost:8545".into(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            rpc_max_retries: default_rpc_max_retries(),
            rpc_retry_backoff_secs: default_rpc_retry_backoff_secs(),
            rpc_connect_timeout_secs: default_rpc_connect_timeout_secs(),
            db_host: "db".into(),
            db_port: 5432,
            db_name: "explorer".into(),
            db_user: "postgres".into(),
            db_password: "secret".into(),
            db_max_conns: default_db_max_conns(),
            db_conn_timeout_secs: default_db_conn_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_conn_lifetime_secs: default_db_conn_lifetime_secs(),
            backfill_start_height: None,
            backfill_end_height: None,
            backfill_workers: default_backfill_workers(),
            backfill_batch_size: default_backfill_batch_size(),
            livetail_poll_interval_secs: default_livetail_poll_interval_secs(),
            reorg_max_depth: default_reorg_max_depth(),
            metrics_port: default_metrics_port(),
            metrics_endpoint: default_metrics_endpoint(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            fanout_port: default_fanout_port(),
        };
        assert_eq!(settings.database_url(), "postgres://postgres:secret@db:5432/explorer");
    }
}
