//! Cache configuration resolution.
//!
//! Configuration text is TOML. A per-cache text holds named definitions under
//! the `cache` table:
//!
//! ```toml
//! [cache.processed_transactions]
//! storage = "persistent"
//! map-size-mb = 128
//! ```
//!
//! Exactly one definition is allowed per text, and whatever the user named it
//! is bound to the internal cache name. Resolution is pure: nothing is opened
//! until the lifecycle manager defines the cache.

use std::collections::BTreeMap;

use serde::Deserialize;
use txbuf_core::{
    CacheConfiguration, CacheDefinition, CacheSettings, ConfigurationError, GlobalConfiguration,
    TxBufError, MAX_MAP_SIZE_MB,
};

/// Name used in errors raised while resolving the global configuration.
const GLOBAL_CONFIGURATION_NAME: &str = "global";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheDocument {
    #[serde(default)]
    cache: BTreeMap<String, CacheSettings>,
}

/// Validates configuration text and binds it to internal cache names.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheConfigurationResolver;

impl CacheConfigurationResolver {
    /// Resolve `config_text` to the single cache definition it contains and
    /// bind it to `cache_name`.
    ///
    /// # Errors
    ///
    /// - `Malformed` if the text is not valid TOML or has unknown keys
    /// - `NoDefinition` if it defines no cache
    /// - `MultipleDefinitions` if it defines more than one
    pub fn resolve(
        cache_name: &str,
        config_text: &str,
    ) -> Result<CacheConfiguration, ConfigurationError> {
        let document: CacheDocument =
            toml::from_str(config_text).map_err(|e| ConfigurationError::Malformed {
                cache_name: cache_name.to_string(),
                reason: e.message().to_string(),
            })?;

        if document.cache.len() > 1 {
            return Err(ConfigurationError::MultipleDefinitions {
                cache_name: cache_name.to_string(),
                found: document.cache.into_keys().collect(),
            });
        }

        let (source_name, settings) = document.cache.into_iter().next().ok_or_else(|| {
            ConfigurationError::NoDefinition {
                cache_name: cache_name.to_string(),
            }
        })?;

        match settings.map_size_mb {
            Some(0) => {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("cache.{}.map-size-mb", source_name),
                    value: "0".to_string(),
                    reason: "map-size-mb must be greater than 0".to_string(),
                });
            }
            Some(size) if size > MAX_MAP_SIZE_MB => {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("cache.{}.map-size-mb", source_name),
                    value: size.to_string(),
                    reason: format!("map-size-mb must not exceed {}", MAX_MAP_SIZE_MB),
                });
            }
            _ => {}
        }

        Ok(CacheConfiguration {
            cache_name: cache_name.to_string(),
            definition: CacheDefinition {
                source_name,
                settings,
            },
        })
    }

    /// Resolve the manager-level configuration.
    ///
    /// `None` yields the backend defaults.
    pub fn resolve_global(
        config_text: Option<&str>,
    ) -> Result<GlobalConfiguration, ConfigurationError> {
        let Some(text) = config_text else {
            return Ok(GlobalConfiguration::default());
        };

        let global: GlobalConfiguration =
            toml::from_str(text).map_err(|e| ConfigurationError::Malformed {
                cache_name: GLOBAL_CONFIGURATION_NAME.to_string(),
                reason: e.message().to_string(),
            })?;

        global.validate().map_err(|e| match e {
            TxBufError::Configuration(config) => config,
            other => ConfigurationError::Malformed {
                cache_name: GLOBAL_CONFIGURATION_NAME.to_string(),
                reason: other.to_string(),
            },
        })?;

        Ok(global)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any single definition binds to the requested name, whatever it is called.
        #[test]
        fn prop_single_definition_binds_to_requested_name(
            user_name in "[a-z][a-z0-9_-]{0,20}",
            cache_name in "[a-z][a-z-]{0,20}",
        ) {
            let text = format!("[cache.{}]\nstorage = \"memory\"", user_name);
            let config = CacheConfigurationResolver::resolve(&cache_name, &text).unwrap();
            prop_assert_eq!(config.cache_name, cache_name);
            prop_assert_eq!(config.definition.source_name, user_name);
        }

        /// Two or more definitions are always rejected.
        #[test]
        fn prop_multiple_definitions_rejected(count in 2usize..6) {
            let text: String = (0..count).map(|i| format!("[cache.def{}]\n", i)).collect();
            let result = CacheConfigurationResolver::resolve("events", &text);
            let is_multiple = matches!(
                result,
                Err(ConfigurationError::MultipleDefinitions { ref found, .. }) if found.len() == count
            );
            prop_assert!(is_multiple);
        }
    }
}
