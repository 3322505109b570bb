//! ANSI "dashboard" rendering of a loaded `AppConfig`, in the same visual
//! idiom the teacher used for its `ServerConfig` dump (box-drawn sections,
//! color-coded labels, tree-branch listener listing) -- retargeted at the
//! worker-runtime's own knobs instead of HTTP routes.

use std::fmt;

use super::{AppConfig, ListenerConfig};

const BOLD: &str = "\x1b[1m";
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

impl fmt::Display for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{CYAN}{}:{}{RESET} [{GREEN}{}{RESET}]",
            self.host, self.port, self.protocol
        )
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{BOLD}🌾 WHEATD WORKER CONFIGURATION{RESET}")?;
        writeln!(f, "├── worker model:      {GREEN}{}{RESET}", self.worker_name)?;
        writeln!(f, "├── worker processes:  {}", self.worker_processes)?;
        writeln!(f, "├── idle timeout:      {}s", self.idle_timeout_secs)?;
        writeln!(f, "├── stats interval:    {}s", self.stats_interval_secs)?;
        writeln!(f, "├── mbuf size:         {} bytes", self.mbuf_size)?;
        writeln!(f, "├── static root:       {YELLOW}{}{RESET}", self.static_root)?;
        if !self.wsgi_script.is_empty() {
            writeln!(f, "├── wsgi script:       {YELLOW}{}{RESET}", self.wsgi_script)?;
        }
        writeln!(f, "└── listeners:")?;
        let last = self.listeners.len().saturating_sub(1);
        for (i, listener) in self.listeners.iter().enumerate() {
            let branch = if i == last { "└──" } else { "├──" };
            writeln!(f, "    {branch} {listener}")?;
        }
        Ok(())
    }
}

/// Prints the dashboard to stdout -- called once at worker boot, mirroring
/// the teacher's standalone `display_config` entry point.
pub fn display_config(config: &AppConfig) {
    println!("{config}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_without_panicking() {
        let config = AppConfig {
            worker_name: "async".to_string(),
            worker_processes: 2,
            listeners: vec![
                ListenerConfig {
                    host: "0.0.0.0".to_string(),
                    port: 8080,
                    protocol: "http".to_string(),
                },
                ListenerConfig {
                    host: "0.0.0.0".to_string(),
                    port: 6379,
                    protocol: "redis".to_string(),
                },
            ],
            idle_timeout_secs: 30,
            stats_interval_secs: 5,
            mbuf_size: 4096,
            static_root: "./www".to_string(),
            wsgi_script: String::new(),
        };
        let rendered = format!("{config}");
        assert!(rendered.contains("async"));
        assert!(rendered.contains("8080"));
        assert!(rendered.contains("redis"));
    }
}
