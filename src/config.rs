//! Environment-driven configuration: `clap`'s `env` derive feature layered
//! over a `.env` file pulled in by `dotenvy` at process start.

use std::time::Duration;

use clap::Args;

/// Settings shared by the controller process. A hub worker process only
/// needs the [`WorkerSettings`] subset, passed down via its own env/args.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// HTTP bind host for the controller API.
    #[arg(long, env = "APP_HOST", default_value = "0.0.0.0")]
    pub app_host: String,

    /// HTTP bind port for the controller API.
    #[arg(long, env = "APP_PORT", default_value_t = 8000)]
    pub app_port: u16,

    /// tracing-subscriber env-filter directive, e.g. "info" or "hubsim=debug".
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Base URL of the NMS northbound API (network/hub/ap/rt CRUD).
    #[arg(long, env = "NBAPI_URL")]
    pub nbapi_url: String,

    /// Base URL of the NMS southbound API (registration and heartbeat).
    #[arg(long, env = "SBAPI_URL")]
    pub sbapi_url: String,

    /// Whether to verify the NMS's TLS certificate. Simulators commonly
    /// point at a self-signed staging NMS, hence the opt-out.
    #[arg(long, env = "VERIFY_SSL_CERT", default_value_t = true)]
    pub verify_ssl_cert: bool,

    /// Timeout, in seconds, applied to every NMS HTTP call.
    #[arg(long, env = "HTTPX_TIMEOUT", default_value_t = 10)]
    pub httpx_timeout_secs: u64,

    /// TCP port the controller's publish (downlink) listener binds.
    #[arg(long, env = "PUB_PORT", default_value_t = 5555)]
    pub pub_port: u16,

    /// TCP port the controller's pull (uplink) listener binds.
    #[arg(long, env = "PULL_PORT", default_value_t = 5556)]
    pub pull_port: u16,

    /// Default heartbeat interval, in seconds, for newly created APs/RTs.
    #[arg(long, env = "DEFAULT_HEARTBEAT_SECONDS", default_value_t = 30)]
    pub default_heartbeat_seconds: u64,

    #[arg(long, env = "DEFAULT_HUBS_PER_NETWORK", default_value_t = 1)]
    pub default_hubs_per_network: u32,

    #[arg(long, env = "DEFAULT_APS_PER_HUB", default_value_t = 1)]
    pub default_aps_per_hub: u32,

    #[arg(long, env = "DEFAULT_RTS_PER_AP", default_value_t = 64)]
    pub default_rts_per_ap: u32,

    /// HMAC secret used to mint admin-role bearer tokens for NMS calls.
    #[arg(long, env = "SECRET_KEY")]
    pub secret_key: String,

    /// HMAC secret used to mint RT-scoped bearer tokens (heartbeat calls).
    #[arg(long, env = "SECRET_KEY_RT")]
    pub secret_key_rt: String,

    #[arg(long, env = "ALGORITHM", default_value = "HS256")]
    pub algorithm: String,

    #[arg(long, env = "TOKEN_EXPIRY_SECONDS", default_value_t = 3600)]
    pub token_expiry_seconds: i64,

    /// Customer/site identifier the simulated networks register under.
    #[arg(long, env = "CSI")]
    pub csi: String,

    /// Shared installer key used during AP candidate registration.
    #[arg(long, env = "INSTALLER_KEY")]
    pub installer_key: String,

    /// Upper bound on concurrently in-flight commands inside a hub worker.
    #[arg(long, env = "MAX_CONCURRENT_WORKER_COMMANDS", default_value_t = 32)]
    pub max_concurrent_worker_commands: usize,

    /// Idle-per-host connection pool size for each worker's shared HTTP client.
    #[arg(long, env = "WORKER_HTTPX_POOLSIZE", default_value_t = 16)]
    pub worker_httpx_poolsize: usize,
}

impl Settings {
    pub fn httpx_timeout(&self) -> Duration {
        Duration::from_secs(self.httpx_timeout_secs)
    }

    /// The loopback address workers use to reach the controller's bus.
    pub fn pub_endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.pub_port)
    }

    pub fn pull_endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.pull_port)
    }
}

/// Subset of [`Settings`] a hub worker process actually needs; passed to it
/// as environment variables when the controller spawns the subprocess
/// (workers never read `APP_HOST`/`APP_PORT`, they have no HTTP surface).
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub nbapi_url: String,
    pub sbapi_url: String,
    pub verify_ssl_cert: bool,
    pub httpx_timeout: Duration,
    pub secret_key: String,
    pub secret_key_rt: String,
    pub algorithm: String,
    pub token_expiry_seconds: i64,
    pub csi: String,
    pub installer_key: String,
    pub max_concurrent_worker_commands: usize,
    pub worker_httpx_poolsize: usize,
}

impl From<&Settings> for WorkerSettings {
    fn from(s: &Settings) -> Self {
        WorkerSettings {
            nbapi_url: s.nbapi_url.clone(),
            sbapi_url: s.sbapi_url.clone(),
            verify_ssl_cert: s.verify_ssl_cert,
            httpx_timeout: s.httpx_timeout(),
            secret_key: s.secret_key.clone(),
            secret_key_rt: s.secret_key_rt.clone(),
            algorithm: s.algorithm.clone(),
            token_expiry_seconds: s.token_expiry_seconds,
            csi: s.csi.clone(),
            installer_key: s.installer_key.clone(),
            max_concurrent_worker_commands: s.max_concurrent_worker_commands,
            worker_httpx_poolsize: s.worker_httpx_poolsize,
        }
    }
}
