//! Caller account creation and modification.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::password::CredentialHasher;
use super::privilege::{Privilege, Role};
use super::session::Session;
use crate::error::{AggregatorError, PropertyMessage, Result};
use crate::storage::{AggregatorDatabase, User};

const MIN_PASSWORD_LEN: usize = 12;
const MAX_PASSWORD_LEN: usize = 16;
const PASSWORD_SPECIALS: &str = "~!@#$%^&*-+_|(){}:;<>,.?/";

/// PATCH body for an account. Absent fields are left unchanged.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AccountUpdate {
    #[serde(rename = "UserName", default)]
    pub username: Option<String>,
    #[serde(rename = "Password", default)]
    pub password: Option<String>,
    #[serde(rename = "RoleId", alias = "RoleID", default)]
    pub role_id: Option<String>,
}

pub struct AccountService {
    db: AggregatorDatabase,
    hasher: Arc<dyn CredentialHasher>,
}

impl AccountService {
    pub fn new(db: AggregatorDatabase, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self { db, hasher }
    }

    /// Create an account. Used for bootstrap and by administrators.
    pub async fn create(&self, username: &str, password: &str, role_id: &str) -> Result<User> {
        if username.is_empty() {
            return Err(AggregatorError::GeneralError("username must not be empty".into()));
        }
        validate_role(role_id)?;
        validate_password(username, password)?;

        match self.db.get_user(username).await {
            Ok(_) => {
                return Err(AggregatorError::GeneralError(format!(
                    "account {username} already exists"
                )));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let hash = self.hash(password)?;
        let user = self.db.create_user(username, &hash, role_id).await?;
        info!(username, role_id, "Account created");
        Ok(user)
    }

    /// Modify `account_id` on behalf of the caller owning `session`.
    pub async fn update(
        &self,
        session: &Session,
        account_id: &str,
        update: &AccountUpdate,
    ) -> Result<User> {
        let role = non_empty(update.role_id.as_deref());
        let password = non_empty(update.password.as_deref());

        if non_empty(update.username.as_deref()).is_some() {
            return Err(AggregatorError::GeneralError(
                "username cannot be modified".into(),
            ));
        }
        if let Some(role) = role {
            validate_role(role)?;
        }

        let user = match self.db.get_user(account_id).await {
            Ok(user) => user,
            Err(e) if e.is_not_found() => {
                return Err(AggregatorError::not_found("Account", account_id));
            }
            Err(e) => return Err(e.into()),
        };

        let configure_users = session.has(Privilege::ConfigureUsers);
        if user.username != session.username && !configure_users {
            return Err(AggregatorError::Privilege(
                "user does not have the privilege to update other accounts".into(),
            ));
        }
        if role.is_some() && !configure_users {
            return Err(AggregatorError::Privilege(
                "user does not have the privilege to update any account role".into(),
            ));
        }

        let hash = match password {
            Some(password) => {
                if !session.has(Privilege::ConfigureSelf) && !configure_users {
                    return Err(AggregatorError::Privilege(
                        "user roles do not allow changing passwords".into(),
                    ));
                }
                validate_password(&user.username, password)?;
                Some(self.hash(password)?)
            }
            None => None,
        };

        let updated = self
            .db
            .update_user(&user.username, hash.as_deref(), role)
            .await?;
        info!(account = %updated.username, by = %session.username, "Account modified");
        Ok(updated)
    }

    fn hash(&self, password: &str) -> Result<String> {
        self.hasher
            .hash(password)
            .map_err(|e| AggregatorError::Internal(e.to_string()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn validate_role(role_id: &str) -> Result<()> {
    role_id
        .parse::<Role>()
        .map(|_| ())
        .map_err(|_| AggregatorError::PropertyValue {
            message: PropertyMessage::NotInList,
            detail: format!("invalid RoleID {role_id}"),
            args: vec![role_id.to_string(), "RoleID".to_string()],
        })
}

fn validate_password(username: &str, password: &str) -> Result<()> {
    let format_error = |detail: &str| AggregatorError::PropertyValue {
        message: PropertyMessage::FormatError,
        detail: detail.to_string(),
        args: vec!["Password".to_string()],
    };

    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(format_error(&format!(
            "password length must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN}"
        )));
    }
    if password.eq_ignore_ascii_case(username) {
        return Err(format_error("password must not equal the username"));
    }
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| PASSWORD_SPECIALS.contains(c));
    if !(has_upper && has_lower && has_digit && has_special) {
        return Err(format_error(
            "password must contain an uppercase letter, a lowercase letter, a digit and a special character",
        ));
    }
    Ok(())
}

/// Northbound representation of an account.
pub fn account_resource(user: &User) -> Value {
    let account_types: Value =
        serde_json::from_str(&user.account_types).unwrap_or_else(|_| json!(["Redfish"]));
    json!({
        "@odata.type": "#ManagerAccount.v1_4_0.ManagerAccount",
        "@odata.id": format!("/redfish/v1/AccountService/Accounts/{}", user.username),
        "@odata.context": "/redfish/v1/$metadata#ManagerAccount.ManagerAccount",
        "Id": user.username,
        "Name": "Account Service",
        "UserName": user.username,
        "RoleId": user.role_id,
        "AccountTypes": account_types,
        "Links": {
            "Role": {
                "@odata.id": format!("/redfish/v1/AccountService/Roles/{}", user.role_id)
            }
        }
    })
}
