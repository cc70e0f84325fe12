use super::env_parse;

/// Caps applied to dependency walks and the organization graph view
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub max_depth: u32,
    pub max_entities: u64,
    /// Organizations allowed per level of requested depth
    pub orgs_per_depth: u64,
}

impl GraphConfig {
    pub fn from_env() -> Self {
        Self {
            max_depth: env_parse("ELDER_GRAPH_MAX_DEPTH", 10),
            max_entities: env_parse("ELDER_GRAPH_MAX_ENTITIES", 100),
            orgs_per_depth: env_parse("ELDER_GRAPH_ORGS_PER_DEPTH", 10),
        }
    }

    /// Clamp a requested depth into `1..=max_depth`
    pub fn clamp_depth(&self, requested: Option<u32>, default: u32) -> u32 {
        requested.unwrap_or(default).clamp(1, self.max_depth.max(1))
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_entities: 100,
            orgs_per_depth: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_depth() {
        let config = GraphConfig::default();
        assert_eq!(config.clamp_depth(None, 3), 3);
        assert_eq!(config.clamp_depth(Some(0), 3), 1);
        assert_eq!(config.clamp_depth(Some(50), 3), 10);
        assert_eq!(config.clamp_depth(Some(7), 3), 7);
    }
}
