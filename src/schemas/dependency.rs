use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::dependency::{self, DependencyType, CRITICALITY_LEVELS};

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct CreateDependency {
    pub source_entity_id: i64,
    pub target_entity_id: i64,
    pub dependency_type: DependencyType,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
}

impl CreateDependency {
    /// Metadata must be an object; `criticality`, when present, one of the known levels
    pub fn checked_metadata(&self) -> Result<Value> {
        let metadata = self
            .metadata
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let Some(object) = metadata.as_object() else {
            return Err(AppError::BadRequest("metadata must be an object".to_string()));
        };

        if let Some(criticality) = object.get("criticality") {
            let valid = criticality
                .as_str()
                .is_some_and(|c| CRITICALITY_LEVELS.contains(&c));
            if !valid {
                return Err(AppError::BadRequest(format!(
                    "criticality must be one of: {}",
                    CRITICALITY_LEVELS.join(", ")
                )));
            }
        }
        Ok(metadata)
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct DependencyResponse {
    pub id: i64,
    pub source_entity_id: i64,
    pub target_entity_id: i64,
    pub dependency_type: DependencyType,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl From<dependency::Model> for DependencyResponse {
    fn from(d: dependency::Model) -> Self {
        Self {
            id: d.id,
            source_entity_id: d.source_entity_id,
            target_entity_id: d.target_entity_id,
            dependency_type: d.dependency_type,
            metadata: d.metadata,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct DependencyListQuery {
    pub source_entity_id: Option<i64>,
    pub target_entity_id: Option<i64>,
    pub dependency_type: Option<DependencyType>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(metadata: Option<Value>) -> CreateDependency {
        CreateDependency {
            source_entity_id: 1,
            target_entity_id: 2,
            dependency_type: DependencyType::DependsOn,
            metadata,
        }
    }

    #[test]
    fn test_criticality_validation() {
        assert!(request(None).checked_metadata().is_ok());
        assert!(request(Some(json!({"criticality": "high"}))).checked_metadata().is_ok());
        assert!(request(Some(json!({"criticality": "urgent"}))).checked_metadata().is_err());
        assert!(request(Some(json!({"criticality": 3}))).checked_metadata().is_err());
        assert!(request(Some(json!([1, 2]))).checked_metadata().is_err());
    }
}
