use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::Path;
use crate::broker_config::{BrokerSettings, RawMqttConfig};
use crate::camera_config::{CameraConfig, RawCameraConfig, RawObjectsConfig};
use crate::errors::AppError;
use log::{debug, info};
use std::time::Instant;

/// Only variables in this namespace are visible to `{NAME}` placeholders.
pub const SUBSTITUTION_ENV_PREFIX: &str = "FRIGATE_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &str) -> Result<Self, AppError> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("yml") | Some("yaml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(AppError::ConfigFormat { path: path.to_string() }),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawLoggerConfig {
    default: Option<String>,
}

// Frigate configs carry far more than we need; unknown keys are ignored.
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    mqtt: Option<RawMqttConfig>,
    #[serde(default)]
    objects: Option<RawObjectsConfig>,
    cameras: Option<BTreeMap<String, Option<RawCameraConfig>>>,
    #[serde(default)]
    logger: Option<RawLoggerConfig>,
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub mqtt: BrokerSettings,
    pub cameras: Vec<CameraConfig>,
    pub log_level: Option<String>,
}

pub fn load_config(path: &str) -> Result<MasterConfig, AppError> {
    load_config_with_vars(path, &collect_substitution_vars())
}

pub fn load_config_with_vars(path: &str, vars: &HashMap<String, String>) -> Result<MasterConfig, AppError> {
    debug!("📄 Attempting to load config from: {}", path);
    let start_time = Instant::now();

    let format = ConfigFormat::from_path(path)?;
    let config_str = fs::read_to_string(path)
        .map_err(|e| AppError::Io(format!("Failed to read configuration file '{}': {}", path, e)))?;
    debug!("Read config file in {:?}", start_time.elapsed());

    let config = parse_config(&config_str, format, vars)?;
    info!(
        "✅ Loaded configuration from '{}' ({} cameras) in {:?}",
        path,
        config.cameras.len(),
        start_time.elapsed()
    );
    Ok(config)
}

pub fn parse_config(contents: &str, format: ConfigFormat, vars: &HashMap<String, String>) -> Result<MasterConfig, AppError> {
    let raw: RawConfig = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(contents)
            .map_err(|e| AppError::ConfigParse(format!("invalid YAML: {}", e)))?,
        ConfigFormat::Json => serde_json::from_str(contents)
            .map_err(|e| AppError::ConfigParse(format!("invalid JSON: {}", e)))?,
    };
    resolve(raw, vars)
}

fn resolve(raw: RawConfig, vars: &HashMap<String, String>) -> Result<MasterConfig, AppError> {
    let mqtt = raw.mqtt.unwrap_or_default();
    let host = match mqtt.host {
        Some(host) if !host.trim().is_empty() => host,
        _ => return Err(AppError::ConfigMissingField("mqtt.host")),
    };
    let raw_cameras = raw.cameras.ok_or(AppError::ConfigMissingField("cameras"))?;

    let password = match mqtt.password {
        Some(template) => Some(substitute_placeholders("mqtt.password", &template, vars)?),
        None => None,
    };

    let mut settings = BrokerSettings::new(host);
    if let Some(port) = mqtt.port {
        settings.port = port;
    }
    if let Some(prefix) = mqtt.topic_prefix {
        settings.topic_prefix = prefix;
    }
    if let Some(client_id) = mqtt.client_id {
        settings.client_id = client_id;
    }
    settings.user = mqtt.user;
    settings.password = password;

    let global_track: &[String] = raw
        .objects
        .as_ref()
        .and_then(|o| o.track.as_deref())
        .unwrap_or(&[]);

    let cameras = raw_cameras
        .iter()
        .map(|(name, cam)| {
            let specific = cam.as_ref().map(|c| c.tracked()).unwrap_or(&[]);
            CameraConfig::new(name.clone(), global_track, specific)
        })
        .collect();

    let config = MasterConfig {
        mqtt: settings,
        cameras,
        log_level: raw.logger.and_then(|l| l.default),
    };
    validate_master_config(&config)?;
    Ok(config)
}

fn validate_master_config(config: &MasterConfig) -> Result<(), AppError> {
    debug!("🕵️ Validating master configuration...");
    for segment in [&config.mqtt.topic_prefix, &config.mqtt.client_id] {
        if segment.is_empty() {
            return Err(AppError::ConfigParse("mqtt.topic_prefix and mqtt.client_id cannot be empty".to_string()));
        }
    }
    if has_wildcards(&config.mqtt.topic_prefix) {
        return Err(AppError::ConfigParse(format!(
            "mqtt.topic_prefix '{}' must not contain MQTT wildcards",
            config.mqtt.topic_prefix
        )));
    }

    for camera in &config.cameras {
        if !is_topic_segment(&camera.name) {
            return Err(AppError::ConfigParse(format!(
                "Camera name '{}' cannot be used in an MQTT topic",
                camera.name
            )));
        }
        for label in &camera.tracked_objects {
            if !is_topic_segment(label) {
                return Err(AppError::ConfigParse(format!(
                    "Tracked object '{}' of camera '{}' cannot be used in an MQTT topic",
                    label, camera.name
                )));
            }
        }
        debug!("Camera '{}' tracks {:?}", camera.name, camera.tracked_objects);
    }
    Ok(())
}

fn has_wildcards(s: &str) -> bool {
    s.contains('+') || s.contains('#')
}

fn is_topic_segment(s: &str) -> bool {
    !s.is_empty() && !has_wildcards(s) && !s.contains('/')
}

/// Snapshot of every `FRIGATE_*` environment variable.
pub fn collect_substitution_vars() -> HashMap<String, String> {
    env::vars()
        .filter(|(key, _)| key.starts_with(SUBSTITUTION_ENV_PREFIX))
        .collect()
}

/// Expand `{NAME}` placeholders from `vars`. `{{` and `}}` are literal braces.
pub fn substitute_placeholders(
    field: &'static str,
    template: &str,
    vars: &HashMap<String, String>,
) -> Result<String, AppError> {
    let fail = |placeholder: &str, details: &str| AppError::ConfigSubstitution {
        field,
        placeholder: placeholder.to_string(),
        details: details.to_string(),
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(fail(&name, "unterminated placeholder")),
                    }
                }
                if name.is_empty() {
                    return Err(fail("{}", "placeholders must name a variable"));
                }
                match vars.get(&name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(fail(
                            &name,
                            &format!("no such {}* environment variable", SUBSTITUTION_ENV_PREFIX),
                        ))
                    }
                }
            }
            '}' => return Err(fail("}", "single '}' encountered")),
            other => out.push(other),
        }
    }
    Ok(out)
}
