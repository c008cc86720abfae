//! The Atlas backend's configuration schema and its typed view.

use std::fmt;

use atlas_core::{ConfigSchema, DefaultSource, SchemaEntry, SchemaError, ValidatedConfig, ValueKind};
use url::Url;

/// Environment variable that overrides any configured access token.
pub const TOKEN_ENV_VAR: &str = "ATLAS_TOKEN";

/// Endpoint used when `address` is not configured.
pub const DEFAULT_ADDRESS: &str = "https://atlas.hashicorp.com/";

pub mod keys {
    pub const NAME: &str = "name";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const ADDRESS: &str = "address";
}

const NAME_DESCRIPTION: &str =
    "Full name of the environment in Atlas, such as 'hashicorp/myenv'";

const ACCESS_TOKEN_DESCRIPTION: &str = "Access token to use to access Atlas. If ATLAS_TOKEN is set then\n\
     this will override any saved value for this.";

const ADDRESS_DESCRIPTION: &str = "Address to your Atlas installation. This defaults to the publicly\n\
     hosted version at 'https://atlas.hashicorp.com/'. This address\n\
     should contain the full HTTP scheme to use.";

/// Builds the schema: `name`, `access_token`, `address`, in that order.
///
/// # Errors
///
/// Only fails if the entry table above is malformed.
pub fn atlas_schema() -> Result<ConfigSchema, SchemaError> {
    ConfigSchema::new(vec![
        SchemaEntry::required(keys::NAME, ValueKind::String).with_description(NAME_DESCRIPTION),
        SchemaEntry::required(keys::ACCESS_TOKEN, ValueKind::String)
            .with_default(DefaultSource::env_override(TOKEN_ENV_VAR))
            .with_description(ACCESS_TOKEN_DESCRIPTION),
        SchemaEntry::optional(keys::ADDRESS, ValueKind::String)
            .with_description(ADDRESS_DESCRIPTION),
    ])
}

/// Typed settings derived from a validated Atlas configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct AtlasConfig {
    /// Environment name, such as `hashicorp/myenv`.
    pub name: String,
    pub access_token: String,
    pub address: Url,
}

impl AtlasConfig {
    /// Post-configure check: converts and rejects values the schema alone
    /// cannot catch.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message for an address that is empty,
    /// unparseable, or not http(s).
    pub fn from_validated(cfg: &ValidatedConfig) -> Result<Self, String> {
        let name = cfg
            .get_str(keys::NAME)
            .ok_or_else(|| "name is not set".to_string())?;
        let access_token = cfg
            .get_str(keys::ACCESS_TOKEN)
            .ok_or_else(|| "access_token is not set".to_string())?;

        let address = match cfg.get_str(keys::ADDRESS) {
            Some(raw) if raw.trim().is_empty() => {
                return Err("configured address is empty".to_string())
            }
            Some(raw) => raw,
            None => DEFAULT_ADDRESS,
        };
        let address =
            Url::parse(address).map_err(|e| format!("address {address:?} is not a valid URL: {e}"))?;
        if !matches!(address.scheme(), "http" | "https") {
            return Err(format!(
                "address {:?} must use the http or https scheme",
                address.as_str()
            ));
        }

        Ok(Self {
            name: name.to_string(),
            access_token: access_token.to_string(),
            address,
        })
    }
}

impl fmt::Debug for AtlasConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtlasConfig")
            .field("name", &self.name)
            .field("access_token", &"<redacted>")
            .field("address", &self.address.as_str())
            .finish()
    }
}
