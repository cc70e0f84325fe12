use std::env;

use super::{env_flag, env_parse};

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret for session tokens; a random one is generated per process when unset
    pub jwt_secret: Option<String>,
    pub access_token_expire_secs: i64,
    /// Trust `X-Auth-Request-Email` / `X-Auth-Request-User` from a fronting SSO proxy
    pub sso_header_enabled: bool,
    /// Create unknown SSO users on first request
    pub sso_jit_provisioning: bool,
    /// Role granted globally to JIT-provisioned identities
    pub sso_default_role: String,
    /// Bootstrap administrator created at startup when no superuser exists
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub admin_email: Option<String>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            jwt_secret: env::var("ELDER_JWT_SECRET").ok().filter(|s| !s.is_empty()),
            access_token_expire_secs: env_parse("ELDER_ACCESS_TOKEN_EXPIRE_SECS", 28800),
            sso_header_enabled: env_flag("ELDER_SSO_HEADER_ENABLED", false),
            sso_jit_provisioning: env_flag("ELDER_SSO_JIT_PROVISIONING", false),
            sso_default_role: env::var("ELDER_SSO_DEFAULT_ROLE")
                .unwrap_or_else(|_| "viewer".to_string()),
            admin_username: env::var("ELDER_ADMIN_USERNAME").ok(),
            admin_password: env::var("ELDER_ADMIN_PASSWORD").ok(),
            admin_email: env::var("ELDER_ADMIN_EMAIL").ok(),
        }
    }
}
