//! SCIM 2.0 user provisioning (RFC 7643 / RFC 7644 subset)
//!
//! Only the `Users` resource is served. Users map onto identities with
//! `auth_provider = scim`; deleting a user deactivates the identity.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::models::identity::{self, AuthProvider, IdentityType};
use crate::models::prelude::*;

pub const USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:User";
pub const LIST_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";
pub const ERROR_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:Error";
pub const PATCH_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

const MAX_PAGE: u64 = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScimName {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    #[serde(rename = "givenName", skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(rename = "familyName", skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
}

impl ScimName {
    /// `formatted`, or given and family names joined
    fn display(&self) -> Option<String> {
        self.formatted.clone().or_else(|| {
            let parts: Vec<&str> = [self.given_name.as_deref(), self.family_name.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScimEmail {
    pub value: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimMeta {
    pub resource_type: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimUser {
    pub schemas: Vec<String>,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub user_name: String,
    pub name: ScimName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub emails: Vec<ScimEmail>,
    pub active: bool,
    pub meta: ScimMeta,
}

/// Body of POST and PUT
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimUserRequest {
    pub user_name: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub name: Option<ScimName>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub emails: Vec<ScimEmail>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl ScimUserRequest {
    fn full_name(&self) -> Option<String> {
        self.name
            .as_ref()
            .and_then(ScimName::display)
            .or_else(|| self.display_name.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchRequest {
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(rename = "Operations")]
    pub operations: Vec<PatchOperation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub schemas: Vec<String>,
    pub total_results: u64,
    pub start_index: u64,
    pub items_per_page: u64,
    #[serde(rename = "Resources")]
    pub resources: Vec<ScimUser>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimError {
    pub schemas: Vec<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scim_type: Option<String>,
    pub detail: String,
}

impl ScimError {
    pub fn new(status: u16, scim_type: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            schemas: vec![ERROR_SCHEMA.to_string()],
            status: status.to_string(),
            scim_type: scim_type.map(String::from),
            detail: detail.into(),
        }
    }
}

pub fn to_scim_user(identity: &identity::Model) -> ScimUser {
    let emails = identity
        .email
        .iter()
        .map(|email| ScimEmail {
            value: email.clone(),
            primary: true,
            kind: Some("work".to_string()),
        })
        .collect();

    ScimUser {
        schemas: vec![USER_SCHEMA.to_string()],
        id: identity.id.to_string(),
        external_id: identity.external_id.clone(),
        user_name: identity.username.clone(),
        name: ScimName {
            formatted: identity.full_name.clone(),
            ..Default::default()
        },
        display_name: identity.full_name.clone(),
        emails,
        active: identity.is_active,
        meta: ScimMeta {
            resource_type: "User".to_string(),
            created: identity.created_at,
            last_modified: identity.updated_at,
            location: format!("/scim/v2/Users/{}", identity.id),
        },
    }
}

/// Primary email, falling back to the first one listed
fn primary_email(emails: &[ScimEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary)
        .or_else(|| emails.first())
        .map(|e| e.value.clone())
}

/// Parse the one supported filter form: `userName eq "value"`
pub fn parse_filter(filter: &str) -> Result<String> {
    let mut parts = filter.trim().splitn(3, char::is_whitespace);
    let attribute = parts.next().unwrap_or_default();
    let operator = parts.next().unwrap_or_default();
    let value = parts.next().unwrap_or_default().trim();

    if !attribute.eq_ignore_ascii_case("userName") || !operator.eq_ignore_ascii_case("eq") {
        return Err(AppError::BadRequest(format!(
            "Unsupported filter: {}",
            filter
        )));
    }

    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .map(String::from)
        .ok_or_else(|| AppError::BadRequest(format!("Unsupported filter: {}", filter)))
}

/// Only identities provisioned through SCIM are visible to the IdP
pub async fn find_user(db: &DbConn, id: &str) -> Result<identity::Model> {
    let not_found = || AppError::NotFound(format!("User {} not found", id));
    let id: i64 = id.parse().map_err(|_| not_found())?;
    Identity::find_by_id(id)
        .filter(identity::Column::AuthProvider.eq(AuthProvider::Scim))
        .one(db)
        .await?
        .ok_or_else(not_found)
}

fn require_user_name(user_name: &str) -> Result<()> {
    if user_name.trim().is_empty() {
        return Err(AppError::BadRequest("userName is required".to_string()));
    }
    Ok(())
}

/// `startIndex` is 1-based
pub async fn list_users(
    db: &DbConn,
    filter: Option<&str>,
    start_index: Option<u64>,
    count: Option<u64>,
) -> Result<ListResponse> {
    let start_index = start_index.unwrap_or(1).clamp(1, i64::MAX as u64);
    let count = count.unwrap_or(100).min(MAX_PAGE);

    let mut select =
        Identity::find().filter(identity::Column::AuthProvider.eq(AuthProvider::Scim));
    if let Some(filter) = filter {
        let user_name = parse_filter(filter)?;
        select = select.filter(identity::Column::Username.eq(user_name));
    }

    let total_results = select.clone().count(db).await?;
    let users = select
        .order_by_asc(identity::Column::Id)
        .offset(start_index - 1)
        .limit(count)
        .all(db)
        .await?;

    let resources: Vec<ScimUser> = users.iter().map(to_scim_user).collect();
    Ok(ListResponse {
        schemas: vec![LIST_SCHEMA.to_string()],
        total_results,
        start_index,
        items_per_page: resources.len() as u64,
        resources,
    })
}

async fn ensure_username_free(db: &DbConn, user_name: &str, except: Option<i64>) -> Result<()> {
    let mut select = Identity::find().filter(identity::Column::Username.eq(user_name));
    if let Some(id) = except {
        select = select.filter(identity::Column::Id.ne(id));
    }
    if select.count(db).await? > 0 {
        return Err(AppError::Conflict(format!(
            "User {} already exists",
            user_name
        )));
    }
    Ok(())
}

pub async fn create_user(db: &DbConn, request: ScimUserRequest) -> Result<identity::Model> {
    require_user_name(&request.user_name)?;
    ensure_username_free(db, &request.user_name, None).await?;

    let now = Utc::now();
    let created = identity::ActiveModel {
        identity_type: Set(IdentityType::Human),
        username: Set(request.user_name.clone()),
        email: Set(primary_email(&request.emails)),
        full_name: Set(request.full_name()),
        hashed_password: Set(None),
        auth_provider: Set(AuthProvider::Scim),
        external_id: Set(request.external_id.clone()),
        is_active: Set(request.active.unwrap_or(true)),
        is_superuser: Set(false),
        last_login_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(created)
}

/// PUT: every provisioned attribute is replaced
pub async fn replace_user(
    db: &DbConn,
    id: &str,
    request: ScimUserRequest,
) -> Result<identity::Model> {
    require_user_name(&request.user_name)?;
    let existing = find_user(db, id).await?;
    ensure_username_free(db, &request.user_name, Some(existing.id)).await?;

    let mut active: identity::ActiveModel = existing.into();
    active.username = Set(request.user_name.clone());
    active.email = Set(primary_email(&request.emails));
    active.full_name = Set(request.full_name());
    active.external_id = Set(request.external_id.clone());
    active.is_active = Set(request.active.unwrap_or(true));
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

/// Apply one `replace`/`add` of a supported attribute
fn apply_attribute(
    active: &mut identity::ActiveModel,
    path: &str,
    value: &Value,
) -> Result<()> {
    let invalid = || AppError::BadRequest(format!("Invalid value for {}", path));

    match path.to_ascii_lowercase().as_str() {
        "active" => {
            let flag = match value {
                Value::Bool(b) => *b,
                // Some IdPs send booleans as strings
                Value::String(s) if s.eq_ignore_ascii_case("true") => true,
                Value::String(s) if s.eq_ignore_ascii_case("false") => false,
                _ => return Err(invalid()),
            };
            active.is_active = Set(flag);
        }
        "username" => {
            let name = value
                .as_str()
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(invalid)?;
            active.username = Set(name.to_string());
        }
        "name.formatted" | "displayname" => {
            active.full_name = Set(value.as_str().map(String::from));
        }
        "name" => {
            let name: ScimName = serde_json::from_value(value.clone()).map_err(|_| invalid())?;
            active.full_name = Set(name.display());
        }
        "externalid" => {
            active.external_id = Set(value.as_str().map(String::from));
        }
        "emails" => {
            let emails: Vec<ScimEmail> =
                serde_json::from_value(value.clone()).map_err(|_| invalid())?;
            active.email = Set(primary_email(&emails));
        }
        p if p.starts_with("emails[") && p.ends_with("].value") => {
            active.email = Set(value.as_str().map(String::from));
        }
        _ => {
            return Err(AppError::BadRequest(format!(
                "Unsupported attribute: {}",
                path
            )))
        }
    }
    Ok(())
}

/// PATCH with `replace`/`add` operations
pub async fn patch_user(db: &DbConn, id: &str, patch: PatchRequest) -> Result<identity::Model> {
    let existing = find_user(db, id).await?;
    let identity_id = existing.id;
    let mut active: identity::ActiveModel = existing.into();

    for operation in &patch.operations {
        let op = operation.op.to_ascii_lowercase();
        if op != "replace" && op != "add" {
            return Err(AppError::BadRequest(format!(
                "Unsupported patch operation: {}",
                operation.op
            )));
        }
        let value = operation
            .value
            .as_ref()
            .ok_or_else(|| AppError::BadRequest("Patch operation requires a value".to_string()))?;

        match &operation.path {
            Some(path) => apply_attribute(&mut active, path, value)?,
            None => {
                let attributes = value.as_object().ok_or_else(|| {
                    AppError::BadRequest("Patch without path requires an object value".to_string())
                })?;
                for (path, value) in attributes {
                    apply_attribute(&mut active, path, value)?;
                }
            }
        }
    }

    if let sea_orm::ActiveValue::Set(user_name) = &active.username {
        ensure_username_free(db, user_name, Some(identity_id)).await?;
    }

    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

/// DELETE: the identity stays for the audit trail but can no longer sign in
pub async fn deactivate_user(db: &DbConn, id: &str) -> Result<identity::Model> {
    let existing = find_user(db, id).await?;
    let mut active: identity::ActiveModel = existing.into();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}
