//! Hosting capability probe
//!
//! Managed hosting environments (e.g. Hugging Face Spaces) route external
//! traffic to the container, so workers must bind `0.0.0.0` to be reachable;
//! everywhere else they stay on loopback. The probe runs once at startup and
//! produces a typed value that is passed down, instead of consulting the
//! environment at call sites.

use crate::config::WorkerConfig;

/// Hosting capabilities detected at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Host workers bind their listeners to
    pub bind_host: String,

    /// Whether a managed hosting environment was detected
    pub managed_hosting: bool,
}

impl Capabilities {
    /// Probe the process environment once.
    pub fn detect(config: &WorkerConfig) -> Self {
        Self::detect_from(config, |name| std::env::var(name).ok())
    }

    /// Probe with an explicit environment lookup.
    pub fn detect_from(
        config: &WorkerConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let managed_hosting = env("SPACE_ID").is_some()
            || env("CHOROS_MANAGED_HOSTING")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false);

        let bind_host = match &config.bind_host {
            Some(host) => host.clone(),
            None if managed_hosting => "0.0.0.0".to_string(),
            None => "127.0.0.1".to_string(),
        };

        Self {
            bind_host,
            managed_hosting,
        }
    }

    /// Host clients dial workers on; always loopback for intra-process latency.
    pub fn callback_host(&self) -> &'static str {
        "127.0.0.1"
    }
}
