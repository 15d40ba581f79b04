//! Service bootstrap utilities
//!
//! Startup banner and development environment loading.

use tracing::info;

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "pollsrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
    /// Default port
    pub default_port: u16,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        default_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            default_port,
        }
    }
}

/// Print startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ██████╗  ██████╗ ██╗     ██╗     ███████╗██████╗ ██╗   ██╗
 ██╔══██╗██╔═══██╗██║     ██║     ██╔════╝██╔══██╗██║   ██║
 ██████╔╝██║   ██║██║     ██║     ███████╗██████╔╝██║   ██║
 ██╔═══╝ ██║   ██║██║     ██║     ╚════██║██╔══██╗╚██╗ ██╔╝
 ██║     ╚██████╔╝███████╗███████╗███████║██║  ██║ ╚████╔╝
 ╚═╝      ╚═════╝ ╚══════╝╚══════╝╚══════╝╚═╝  ╚═╝  ╚═══╝
"#;

    info!("{}", banner);
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" Default Port: {}", service.default_port);
}

/// Load environment variables in development mode
///
/// In debug builds, reads `.env` and sets variables that are not already set.
/// No-op in release builds.
pub fn load_development_env() {
    #[cfg(debug_assertions)]
    {
        if let Ok(content) = std::fs::read_to_string(".env") {
            for (key, value) in parse_env_lines(&content) {
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

/// Parse `KEY=VALUE` lines, skipping comments and blanks
fn parse_env_lines(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}
