//! Payment processor credentials and country allow-list.
//!
//! The secret key is write-only from the outside: no read path returns it,
//! and its `Debug` output is redacted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{ServiceError, ServiceResult};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripeConfiguration {
    pub secret_key: String,
    /// ISO 3166-1 alpha-2 codes. Empty means no restriction.
    #[serde(default)]
    pub allowed_countries: BTreeSet<String>,
}

impl std::fmt::Debug for StripeConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfiguration")
            .field("secret_key", &"<redacted>")
            .field("allowed_countries", &self.allowed_countries)
            .finish()
    }
}

impl StripeConfiguration {
    /// Trim the key and upper-case the country codes.
    pub fn normalized(secret_key: &str, countries: impl IntoIterator<Item = String>) -> ServiceResult<Self> {
        let secret_key = secret_key.trim();
        if secret_key.is_empty() {
            return Err(ServiceError::invalid("secretKey", "must not be empty"));
        }
        let allowed_countries = countries
            .into_iter()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        Ok(Self {
            secret_key: secret_key.to_string(),
            allowed_countries,
        })
    }
}

/// Singleton holding the current configuration, if any.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    current: Option<StripeConfiguration>,
}

impl PaymentSettings {
    pub fn is_configured(&self) -> bool {
        self.current.is_some()
    }

    pub fn set(&mut self, config: StripeConfiguration) {
        self.current = Some(config);
    }

    /// Internal accessor for the gateway; never exposed through the API.
    pub fn current(&self) -> Option<&StripeConfiguration> {
        self.current.as_ref()
    }
}
