use std::{collections::HashMap, fs};

#[derive(Debug)]
pub struct Settings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub realtime_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:4000/graphql".into(),
            api_key: None,
            realtime_endpoint: None,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("listmirror.toml") {
        apply_file_config(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("LISTMIRROR_ENDPOINT") {
        settings.endpoint = v;
    }
    if let Ok(v) = std::env::var("LISTMIRROR_API_KEY") {
        settings.api_key = Some(v);
    }
    if let Ok(v) = std::env::var("LISTMIRROR_REALTIME_ENDPOINT") {
        settings.realtime_endpoint = Some(v);
    }

    settings
}

fn apply_file_config(settings: &mut Settings, raw: &str) {
    if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) {
        if let Some(v) = file_cfg.get("endpoint") {
            settings.endpoint = v.clone();
        }
        if let Some(v) = file_cfg.get("api_key") {
            settings.api_key = Some(v.clone());
        }
        if let Some(v) = file_cfg.get("realtime_endpoint") {
            settings.realtime_endpoint = Some(v.clone());
        }
    }
}
