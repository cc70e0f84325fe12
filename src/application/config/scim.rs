use std::env;

use super::env_flag;

#[derive(Debug, Clone)]
pub struct ScimConfig {
    pub enabled: bool,
    pub bearer_token: Option<String>,
}

impl ScimConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag("ELDER_SCIM_ENABLED", false),
            bearer_token: env::var("ELDER_SCIM_BEARER_TOKEN").ok().filter(|s| !s.is_empty()),
        }
    }
}
