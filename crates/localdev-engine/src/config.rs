//! Service definition and server options.
//!
//! [`ServiceConfig`] is the serde model of a serverless-style service file.
//! Values are accepted loosely: ports may be numbers or strings and flags
//! may be `true` or `"true"`. [`ServerOptions`] is what the server actually
//! runs with, resolved from the service file and caller overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::errors::ConfigError;
use crate::queue::ConsumerConfig;
use crate::triggers::loose_bool;

pub const DEFAULT_PORT: u16 = 5005;

pub const DOMAIN_MANAGER_PLUGIN: &str = "serverless-domain-manager";
pub const WEBPACK_PLUGIN: &str = "serverless-webpack";

// ---------------------------------------------------------------------------
// Service file model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service: Option<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub provider: ProviderConfig,
    #[serde(deserialize_with = "null_as_default")]
    pub functions: BTreeMap<String, FunctionConfig>,
    pub plugins: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub custom: CustomConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(deserialize_with = "null_as_default")]
    pub environment: BTreeMap<String, Value>,
    pub profile: Option<String>,
    pub region: Option<String>,
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FunctionConfig {
    pub handler: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub events: Vec<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub environment: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomConfig {
    pub local_dev_port: Option<Value>,
    pub local_dev_cors: Option<Value>,
    pub local_dev_static_folder: Option<String>,
    pub local_dev_schedule_show_local_time: Option<Value>,
    pub local_dev_schedule_auto_fire: Option<Value>,
    pub local_dev_sqs_polling: Option<Value>,
    pub custom_domain: Option<CustomDomain>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomDomain {
    pub base_path: Option<String>,
}

/// Sections written with no value (`events:`) parse as YAML null.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ServiceConfig {
    /// Read a service file. `.json` files are parsed as JSON, anything else
    /// as YAML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(&text)?)
        } else {
            Self::from_yaml(&text)
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn service_name(&self) -> Option<String> {
        match &self.service {
            Some(Value::String(name)) => Some(name.clone()),
            Some(Value::Object(map)) => map.get("name").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    /// Whether `plugins` lists `name`, either as a list or as `{ modules: [...] }`.
    pub fn has_plugin(&self, name: &str) -> bool {
        let list = match &self.plugins {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("modules") {
                Some(Value::Array(items)) => items,
                _ => return false,
            },
            _ => return false,
        };
        list.iter().any(|item| item.as_str() == Some(name))
    }

    /// The custom domain base path, honoured only with the domain manager plugin.
    pub fn base_path(&self) -> Option<String> {
        if !self.has_plugin(DOMAIN_MANAGER_PLUGIN) {
            return None;
        }
        self.custom
            .custom_domain
            .as_ref()
            .and_then(|domain| domain.base_path.clone())
            .filter(|path| !path.trim_matches('/').is_empty())
    }

    pub fn provider_environment(&self) -> BTreeMap<String, String> {
        stringify_env(&self.provider.environment)
    }
}

impl FunctionConfig {
    pub fn declared_environment(&self) -> BTreeMap<String, String> {
        stringify_env(&self.environment)
    }
}

/// Environment values are written as scalars of any type; handlers see strings.
fn stringify_env(values: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    values
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), text))
        })
        .collect()
}

fn port_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Server options
// ---------------------------------------------------------------------------

/// Runtime options for [`LocalDevServer`](crate::server::LocalDevServer).
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub port: u16,
    /// Answer cross-origin preflight on every route.
    pub cors: bool,
    /// Directory mounted read-only at `/static`.
    pub static_folder: Option<PathBuf>,
    pub show_local_time: bool,
    /// Fire schedule triggers on their own cadence.
    pub auto_fire_schedules: bool,
    /// Run a consumer loop per sqs trigger.
    pub poll_queues: bool,
    /// Overrides applied on top of provider and function environments.
    pub environment: BTreeMap<String, String>,
    pub consumer: ConsumerConfig,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cors: false,
            static_folder: None,
            show_local_time: false,
            auto_fire_schedules: false,
            poll_queues: false,
            environment: BTreeMap::new(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl ServerOptions {
    /// Options as declared by the service file's `custom` and `provider`
    /// sections. Callers layer command-line overrides on top.
    pub fn from_service(config: &ServiceConfig, service_dir: &Path) -> Self {
        let custom = &config.custom;
        let flag = |value: &Option<Value>| value.as_ref().is_some_and(loose_bool);

        let mut environment = BTreeMap::new();
        if let Some(profile) = &config.provider.profile {
            environment.insert("AWS_PROFILE".to_string(), profile.clone());
        }
        if let Some(region) = &config.provider.region {
            environment.insert("AWS_REGION".to_string(), region.clone());
        }

        Self {
            port: custom
                .local_dev_port
                .as_ref()
                .and_then(port_value)
                .unwrap_or(DEFAULT_PORT),
            cors: flag(&custom.local_dev_cors),
            static_folder: custom
                .local_dev_static_folder
                .as_deref()
                .map(|folder| service_dir.join(folder.trim_start_matches('/'))),
            show_local_time: flag(&custom.local_dev_schedule_show_local_time),
            auto_fire_schedules: flag(&custom.local_dev_schedule_auto_fire),
            poll_queues: flag(&custom.local_dev_sqs_polling),
            environment,
            consumer: ConsumerConfig::default(),
        }
    }
}
