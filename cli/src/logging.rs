//! Tracing initialisation for the CLI.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs instead of text
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `debug` everywhere when verbose, `info` otherwise.
    pub fn from_flags(verbose: bool, json: bool) -> Self {
        Self {
            level: if verbose { "debug" } else { "info" }.into(),
            json,
            ..Self::default()
        }
    }

    /// Add per-component overrides; later entries win.
    pub fn with_components(mut self, components: impl IntoIterator<Item = (String, String)>) -> Self {
        self.components.extend(components);
        self
    }

    /// Filter directives, e.g. `"info,connectorhub_stream=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Parse a `component=level` override from the command line.
pub fn parse_component_level(s: &str) -> Result<(String, String), String> {
    let (component, level) = s
        .split_once('=')
        .ok_or_else(|| format!("expected COMPONENT=LEVEL, got '{s}'"))?;
    let level = level.trim().to_ascii_lowercase();
    if component.trim().is_empty() {
        return Err(format!("missing component in '{s}'"));
    }
    if level.parse::<tracing::Level>().is_err() {
        return Err(format!("unknown level '{level}'"));
    }
    Ok((component.trim().to_string(), level))
}

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false))
            .init();
    }
}
