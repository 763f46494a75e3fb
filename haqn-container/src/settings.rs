//! Registry configuration.

use serde::{Deserialize, Serialize};

use crate::scope::Scope;

/// Tunables for a [`FeatureRegistry`](crate::registry::FeatureRegistry).
///
/// Missing fields take their defaults, so a partial document is enough:
///
/// ```
/// use haqn_container::settings::RegistrySettings;
/// use haqn_container::scope::Scope;
///
/// let settings = RegistrySettings::default();
/// assert_eq!(settings.default_scope, Scope::Worker);
/// assert_eq!(settings.max_suggestions, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Scope used by [`provide`](crate::registry::FeatureRegistry::provide).
    pub default_scope: Scope,

    /// How many similar keys a missing-feature error lists. `0` disables
    /// suggestions.
    pub max_suggestions: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            default_scope: Scope::Worker,
            max_suggestions: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let settings: RegistrySettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, RegistrySettings::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let settings: RegistrySettings =
            serde_json::from_str(r#"{ "default_scope": "Process" }"#).unwrap();
        assert_eq!(settings.default_scope, Scope::Process);
        assert_eq!(settings.max_suggestions, 3);
    }

    #[test]
    fn custom_scope_by_name() {
        let settings: RegistrySettings =
            serde_json::from_str(r#"{ "default_scope": "tenant", "max_suggestions": 0 }"#)
                .unwrap();
        assert_eq!(settings.default_scope, Scope::custom("tenant"));
        assert_eq!(settings.max_suggestions, 0);
    }

    #[test]
    fn serializes_scope_as_name() {
        let json = serde_json::to_value(RegistrySettings::default()).unwrap();
        assert_eq!(json["default_scope"], "Worker");
        assert_eq!(json["max_suggestions"], 3);
    }
}
