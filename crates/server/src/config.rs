use std::{fs, time::Duration};

use serde::Deserialize;
use server_api::{default_resources, GatewayConfig, ResourceConfig, DEFAULT_BACKEND_TIMEOUT};
use tracing::warn;

const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug)]
pub struct Settings {
    pub server_bind: String,
    pub backend_base_url: String,
    pub backend_timeout_seconds: u64,
    pub resources: Vec<ResourceConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            backend_base_url: "http://localhost:8000/api/".into(),
            backend_timeout_seconds: DEFAULT_BACKEND_TIMEOUT.as_secs(),
            resources: default_resources(),
        }
    }
}

impl Settings {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.backend_base_url.clone(),
            timeout: Duration::from_secs(self.backend_timeout_seconds),
            resources: self.resources.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    backend_base_url: Option<String>,
    backend_timeout_seconds: Option<u64>,
    resources: Option<Vec<ResourceConfig>>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |name| std::env::var(name).ok());

    settings
}

pub(crate) fn apply_file(settings: &mut Settings, raw: &str) {
    let file_cfg = match toml::from_str::<FileSettings>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(error) => {
            warn!(file = SETTINGS_FILE, %error, "ignoring unreadable settings file");
            return;
        }
    };

    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.backend_base_url {
        settings.backend_base_url = v;
    }
    if let Some(v) = file_cfg.backend_timeout_seconds {
        settings.backend_timeout_seconds = v;
    }
    if let Some(v) = file_cfg.resources {
        settings.resources = v;
    }
}

/// Environment overrides. `APP__*` names win over the short forms.
pub(crate) fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = lookup("BACKEND_BASE_URL") {
        settings.backend_base_url = v;
    }
    if let Some(v) = lookup("APP__BACKEND_BASE_URL") {
        settings.backend_base_url = v;
    }

    if let Some(v) = lookup("APP__BACKEND_TIMEOUT_SECONDS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.backend_timeout_seconds = parsed,
            Err(_) => warn!(value = %v, "ignoring non-numeric APP__BACKEND_TIMEOUT_SECONDS"),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
