//! Built-in plugins.

mod php_cpd;
mod php_spec;
mod php_unit;
mod shell;

use serde::de::DeserializeOwned;

use crate::error::PluginConfigError;
use crate::services::pipeline::plugin::Plugin;
use crate::services::pipeline::registry::PluginRegistry;

pub use php_cpd::PhpCpd;
pub use php_spec::PhpSpec;
pub use php_unit::PhpUnit;
pub use shell::Shell;

pub(crate) fn register_defaults(registry: &mut PluginRegistry) {
    registry.register(php_unit::NAME, |options, _settings| {
        Ok(Box::new(PhpUnit::from_options(options)?) as Box<dyn Plugin>)
    });
    registry.register(php_cpd::NAME, |options, settings| {
        Ok(Box::new(PhpCpd::from_options(options, settings)?) as Box<dyn Plugin>)
    });
    registry.register(php_spec::NAME, |options, _settings| {
        Ok(Box::new(PhpSpec::from_options(options)?) as Box<dyn Plugin>)
    });
    registry.register(shell::NAME, |options, _settings| {
        Ok(Box::new(Shell::from_options(options)?) as Box<dyn Plugin>)
    });
}

/// Deserialize typed options; `null` means "all defaults".
pub(crate) fn parse_options<T>(plugin: &str, options: &serde_json::Value) -> Result<T, PluginConfigError>
where
    T: DeserializeOwned + Default,
{
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).map_err(|source| PluginConfigError::InvalidOptions {
        plugin: plugin.to_string(),
        source,
    })
}

/// A path option that must stay inside the working copy.
pub(crate) fn relative_option(
    plugin: &str,
    option: &'static str,
    value: &str,
) -> Result<String, PluginConfigError> {
    let trimmed = value.trim().trim_start_matches("./");
    let escapes = trimmed.starts_with('/') || trimmed.split('/').any(|part| part == "..");
    if escapes {
        return Err(PluginConfigError::InvalidValue {
            plugin: plugin.to_string(),
            option,
            reason: format!("`{value}` must be relative to the working copy"),
        });
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_option_rejects_escapes() {
        assert_eq!(relative_option("p", "path", "./src/").expect("ok"), "src");
        assert!(relative_option("p", "path", "/etc").is_err());
        assert!(relative_option("p", "path", "src/../../etc").is_err());
    }
}
