//! Account and session queries.

use fleetgate_core::db::unix_timestamp;

use super::db::{AggregatorDatabase, DatabaseError};
use super::models::{SessionRecord, User};

impl AggregatorDatabase {
    // =========================================================================
    // User queries
    // =========================================================================

    /// Create a new account.
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role_id: &str,
    ) -> Result<User, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO users (username, password_hash, role_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(role_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_user(username).await
    }

    /// Get an account by username.
    pub async fn get_user(&self, username: &str) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User {username}")))
    }

    /// Update the password hash and/or role of an account.
    pub async fn update_user(
        &self,
        username: &str,
        password_hash: Option<&str>,
        role_id: Option<&str>,
    ) -> Result<User, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE users SET password_hash = COALESCE(?, password_hash), role_id = COALESCE(?, role_id), updated_at = ? WHERE username = ?",
        )
        .bind(password_hash)
        .bind(role_id)
        .bind(now)
        .bind(username)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("User {username}")));
        }
        self.get_user(username).await
    }

    pub async fn count_users(&self) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    // =========================================================================
    // Session queries
    // =========================================================================

    /// Store a new caller session.
    pub async fn create_session(
        &self,
        token: &str,
        username: &str,
        privileges_json: &str,
        now: i64,
    ) -> Result<SessionRecord, DatabaseError> {
        sqlx::query(
            "INSERT INTO sessions (token, username, privileges, created_at, last_used_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(token)
        .bind(username)
        .bind(privileges_json)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_session(token).await
    }

    /// Get a session by token.
    pub async fn get_session(&self, token: &str) -> Result<SessionRecord, DatabaseError> {
        sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound("Session".to_string()))
    }

    /// Record a use of the session at `at`.
    pub async fn touch_session(&self, token: &str, at: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE sessions SET last_used_at = ? WHERE token = ?")
            .bind(at)
            .bind(token)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Remove a session. Returns whether a row was deleted.
    pub async fn delete_session(&self, token: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All session tokens, for the expiry sweep.
    pub async fn list_session_tokens(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT token FROM sessions")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    /// Remove every session belonging to an account.
    pub async fn delete_user_sessions(&self, username: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM sessions WHERE username = ?")
            .bind(username)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
