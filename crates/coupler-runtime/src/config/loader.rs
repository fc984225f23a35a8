//! Configuration loader.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. The run file (`[Global]` plus one table per component)
//! 3. Environment variables (`COUPLER_*`)
//! 4. Explicit overrides (command-line flags)
//!
//! Each layer overrides the previous. Layers 3 and 4 only touch the global
//! section.

use super::{
    ComponentSection, ConfigError, GlobalSettings, Mode, RunConfig, ENV_CLOBBER,
    ENV_DEADLOCK_TIMEOUT_MS, ENV_MODE,
};
use coupler_component::Params;
use coupler_types::GLOBAL_SECTION;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where the run description comes from.
#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Inline(String),
}

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```
/// use coupler_runtime::config::ConfigLoader;
///
/// let config = ConfigLoader::from_toml(
///     r#"
/// [Global]
/// clobber = false
///
/// [DummyComponent.a]
/// name = "x"
/// "#,
/// )
/// .skip_env_vars()
/// .load()
/// .unwrap();
///
/// assert!(!config.global.clobber);
/// assert_eq!(config.components[0].params.get("name"), Some("x"));
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    source: Source,

    /// Skip environment variable loading.
    skip_env: bool,

    /// Global keys forced by the caller, applied last.
    overrides: Vec<(String, String)>,
}

impl ConfigLoader {
    /// Loads the run description from a file.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::with_source(Source::File(path.into()))
    }

    /// Loads the run description from TOML text.
    #[must_use]
    pub fn from_toml(text: impl Into<String>) -> Self {
        Self::with_source(Source::Inline(text.into()))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            skip_env: false,
            overrides: Vec::new(),
        }
    }

    /// Skips environment variable loading.
    ///
    /// Useful for testing with deterministic config.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Forces a global setting, overriding file and environment.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Loads, flattens and validates the run description.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, a section
    /// is malformed, or a global setting is invalid.
    pub fn load(&self) -> Result<RunConfig, ConfigError> {
        let (origin, text) = match &self.source {
            Source::File(path) => {
                let text =
                    std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
                (path.clone(), text)
            }
            Source::Inline(text) => (PathBuf::from("<inline>"), text.clone()),
        };

        let (mut global, components) = parse_document(&origin, &text)?;
        debug!(
            path = %origin.display(),
            components = components.len(),
            "Parsed run configuration"
        );

        if !self.skip_env {
            apply_env_vars(&mut global, |name| std::env::var(name).ok())?;
        }

        for (key, value) in &self.overrides {
            debug!(key = %key, value = %value, "Applying global override");
            global.insert(key.clone(), value.clone());
        }

        Ok(RunConfig {
            global: GlobalSettings::from_params(global)?,
            components,
        })
    }
}

/// Splits a TOML document into the global section and component sections.
///
/// `[Kind.instance]` headers are nested tables in TOML: a top-level table
/// made only of sub-tables is a kind with one component per sub-table,
/// named `Kind.instance`.
fn parse_document(
    origin: &Path,
    text: &str,
) -> Result<(Params, Vec<ComponentSection>), ConfigError> {
    let table: toml::Table = toml::from_str(text).map_err(|e| ConfigError::parse_toml(origin, e))?;

    let mut global: Option<(String, Params)> = None;
    let mut components = Vec::new();

    for (section, value) in &table {
        let toml::Value::Table(entries) = value else {
            return Err(ConfigError::InvalidSection {
                section: section.clone(),
            });
        };

        if section.eq_ignore_ascii_case(GLOBAL_SECTION) {
            let params = flatten_section(section, entries)?;
            if let Some((first, _)) = &global {
                return Err(ConfigError::DuplicateGlobal {
                    first: first.clone(),
                    second: section.clone(),
                });
            }
            global = Some((section.clone(), params));
            continue;
        }

        let is_kind = !entries.is_empty() && entries.values().all(toml::Value::is_table);
        if is_kind {
            for (instance, value) in entries {
                let name = format!("{section}.{instance}");
                let toml::Value::Table(instance_entries) = value else {
                    return Err(ConfigError::InvalidSection { section: name });
                };
                components.push(ComponentSection::new(
                    &name,
                    flatten_section(&name, instance_entries)?,
                ));
            }
        } else {
            components.push(ComponentSection::new(
                section,
                flatten_section(section, entries)?,
            ));
        }
    }

    Ok((global.map(|(_, p)| p).unwrap_or_default(), components))
}

fn flatten_section(section: &str, entries: &toml::Table) -> Result<Params, ConfigError> {
    entries
        .iter()
        .map(|(key, value)| {
            flatten_value(value)
                .map(|flat| (key.clone(), flat))
                .ok_or_else(|| ConfigError::UnsupportedValue {
                    section: section.to_string(),
                    key: key.clone(),
                })
        })
        .collect()
}

/// Renders a parameter value as the string a component will receive.
///
/// Arrays of scalars become comma-separated lists.
fn flatten_value(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(items) => items
            .iter()
            .map(|item| match item {
                toml::Value::Array(_) | toml::Value::Table(_) => None,
                scalar => flatten_value(scalar),
            })
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(", ")),
        toml::Value::Table(_) => None,
    }
}

/// Applies `COUPLER_*` overrides read through `lookup`.
fn apply_env_vars(
    global: &mut Params,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(val) = lookup(ENV_MODE) {
        let mode: Mode = val
            .parse()
            .map_err(|e: String| ConfigError::invalid_env_var(ENV_MODE, e))?;
        global.insert("mode", mode.to_string());
    }

    if let Some(val) = lookup(ENV_CLOBBER) {
        let clobber =
            parse_bool(&val).ok_or_else(|| ConfigError::invalid_env_var(ENV_CLOBBER, "expected bool"))?;
        global.insert("clobber", clobber.to_string());
    }

    if let Some(val) = lookup(ENV_DEADLOCK_TIMEOUT_MS) {
        let ms: u64 = val.trim().parse().map_err(|_| {
            ConfigError::invalid_env_var(ENV_DEADLOCK_TIMEOUT_MS, "expected milliseconds")
        })?;
        global.insert("deadlock_timeout_ms", ms.to_string());
    }

    Ok(())
}

/// Parses a boolean from string.
///
/// Accepts: "true", "false", "1", "0", "yes", "no", "on", "off" (case-insensitive).
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
