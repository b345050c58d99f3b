//! Translation of URLs and payloads between the northbound and southbound
//! namespaces.

use fleetgate_core::config::{TranslationRule, UrlTranslation};

/// Applies the configured rule lists. Every rule of a direction is applied,
/// in configured order, to the whole string.
#[derive(Debug, Clone)]
pub struct IdentityTranslator {
    north_bound: Vec<TranslationRule>,
    south_bound: Vec<TranslationRule>,
}

impl IdentityTranslator {
    pub fn new(config: &UrlTranslation) -> Self {
        Self {
            north_bound: config.north_bound.clone(),
            south_bound: config.south_bound.clone(),
        }
    }

    fn apply(rules: &[TranslationRule], input: &str) -> String {
        rules
            .iter()
            .fold(input.to_string(), |acc, rule| acc.replace(&rule.from, &rule.to))
    }

    /// Rewrite a caller URL and request body for a plugin.
    pub fn to_southbound(&self, url: &str, body: &str) -> (String, String) {
        (
            Self::apply(&self.south_bound, url),
            Self::apply(&self.south_bound, body),
        )
    }

    /// Rewrite a plugin `Location` and response body for the caller.
    pub fn to_northbound(&self, location: &str, body: &str) -> (String, String) {
        (
            Self::apply(&self.north_bound, location),
            Self::apply(&self.north_bound, body),
        )
    }

    pub fn url_to_southbound(&self, url: &str) -> String {
        Self::apply(&self.south_bound, url)
    }

    pub fn url_to_northbound(&self, url: &str) -> String {
        Self::apply(&self.north_bound, url)
    }
}

impl Default for IdentityTranslator {
    fn default() -> Self {
        Self::new(&UrlTranslation::default())
    }
}
