//! Worker-process boot configuration (SPEC_FULL.md §1 "[ADDED] Configuration").
//!
//! Loaded once at master boot through the workspace's own hand-rolled YAML
//! stack (`parser`/`parser_derive`) rather than `serde` -- that is the
//! teacher's own choice of tooling (`error.rs` already wraps `parser::YamlError`),
//! generalized from the teacher's HTTP-route-shaped config to the minimal
//! set of knobs the worker runtime itself needs: which worker model to run,
//! how many processes to fan out to, which `{host, port, protocol}` triples
//! to listen on, and the handful of app-level knobs (`static_root` for the
//! static-file app) that have nowhere else to live.
//!
//! Deliberately not grown into a full web-server config language (HTTP
//! routes, CGI extensions, per-route body limits, etc. stay a non-goal, see
//! SPEC_FULL.md REDESIGN FLAGS) -- that scope stayed with the teacher's
//! abandoned `config_handler`/route-table experiment, which this replaces.

pub mod display;
pub mod validate;

use parser_derive::YamlStruct;

#[derive(Debug, Clone, YamlStruct)]
pub struct ListenerConfig {
    #[field(default = "0.0.0.0")]
    pub host: String,
    pub port: u16,
    #[field(default = "http")]
    pub protocol: String,
}

#[derive(Debug, Clone, YamlStruct)]
pub struct AppConfig {
    /// Picks a row of the worker table: `"sync"` or `"async"`.
    #[field(default = "sync")]
    pub worker_name: String,
    /// Number of worker processes the master forks (component #10).
    #[field(default = "1")]
    pub worker_processes: usize,
    pub listeners: Vec<ListenerConfig>,
    #[field(default = "30")]
    pub idle_timeout_secs: u64,
    #[field(default = "5")]
    pub stats_interval_secs: u64,
    #[field(default = "4096")]
    pub mbuf_size: usize,
    /// Document root for the static-file app.
    #[field(default = "./www")]
    pub static_root: String,
    /// Script the wsgi-style app shells out to per request; empty disables it.
    #[field(default = "")]
    pub wsgi_script: String,
}

impl AppConfig {
    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn stats_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stats_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parser::FromYaml;

    #[test]
    fn parses_minimal_config() {
        let yaml = "
listeners:
  - port: 8080
";
        let config = AppConfig::from_str(yaml).unwrap();
        assert_eq!(config.worker_name, "sync");
        assert_eq!(config.worker_processes, 1);
        assert_eq!(config.listeners.len(), 1);
        assert_eq!(config.listeners[0].port, 8080);
        assert_eq!(config.listeners[0].host, "0.0.0.0");
        assert_eq!(config.listeners[0].protocol, "http");
        assert_eq!(config.idle_timeout_secs, 30);
    }

    #[test]
    fn parses_multi_protocol_listeners() {
        let yaml = "
worker_name: async
worker_processes: 4
listeners:
  - host: 0.0.0.0
    port: 8080
    protocol: http
  - port: 6379
    protocol: redis
static_root: /srv/www
";
        let config = AppConfig::from_str(yaml).unwrap();
        assert_eq!(config.worker_name, "async");
        assert_eq!(config.worker_processes, 4);
        assert_eq!(config.listeners.len(), 2);
        assert_eq!(config.listeners[1].protocol, "redis");
        assert_eq!(config.listeners[1].host, "0.0.0.0");
        assert_eq!(config.static_root, "/srv/www");
    }

    #[test]
    fn missing_listeners_is_an_error() {
        let yaml = "worker_name: sync";
        assert!(AppConfig::from_str(yaml).is_err());
    }
}
