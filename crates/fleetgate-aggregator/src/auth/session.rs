//! Caller sessions: login, validation with idle expiry, and the expiry sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use fleetgate_core::config::AuthConfig;
use fleetgate_core::db::unix_timestamp;

use super::Authorizer;
use super::password::CredentialHasher;
use super::privilege::{Privilege, Role, decode_privileges, encode_privileges};
use crate::error::{AggregatorError, Result};
use crate::storage::{AggregatorDatabase, DatabaseError, SessionRecord, User};

/// Shortest period of the background sweep tick.
const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// A validated caller session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub privileges: Vec<Privilege>,
    pub created_at: i64,
    pub last_used_at: i64,
}

impl Session {
    pub fn has(&self, privilege: Privilege) -> bool {
        self.privileges.contains(&privilege)
    }

    fn from_record(record: SessionRecord) -> Result<Self> {
        let privileges = decode_privileges(&record.privileges).map_err(|e| {
            AggregatorError::from(DatabaseError::Corrupt(format!("session privileges: {e}")))
        })?;
        Ok(Self {
            token: record.token,
            username: record.username,
            privileges,
            created_at: record.created_at,
            last_used_at: record.last_used_at,
        })
    }
}

/// Result of one call to [`SessionManager::sweep_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// A sweep ran less than one cleanup interval ago.
    Throttled,
    /// The session table could not be enumerated; the watermark is unchanged.
    Aborted,
    Completed { scanned: usize, removed: usize },
}

/// Owns caller sessions and the cleanup watermark.
pub struct SessionManager {
    db: AggregatorDatabase,
    hasher: Arc<dyn CredentialHasher>,
    timeout_secs: i64,
    cleanup_interval: Duration,
    last_cleanup: Mutex<Option<Instant>>,
    sweep_trigger: mpsc::Sender<()>,
}

impl SessionManager {
    /// `sweep_trigger` is the sending half of the channel handed to
    /// [`spawn_sweeper`].
    pub fn new(
        db: AggregatorDatabase,
        hasher: Arc<dyn CredentialHasher>,
        config: &AuthConfig,
        sweep_trigger: mpsc::Sender<()>,
    ) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        let timeout_secs = config.session_timeout().as_secs() as i64;
        Self {
            db,
            hasher,
            timeout_secs,
            cleanup_interval: config.cleanup_interval(),
            last_cleanup: Mutex::new(None),
            sweep_trigger,
        }
    }

    pub const fn hasher(&self) -> &Arc<dyn CredentialHasher> {
        &self.hasher
    }

    /// Ask the sweeper to run. Dropped when a request is already pending.
    fn request_sweep(&self) {
        if self.sweep_trigger.try_send(()).is_err() {
            debug!("Session sweep already pending");
        }
    }

    const fn is_expired(&self, last_used_at: i64, now: i64) -> bool {
        now - last_used_at > self.timeout_secs
    }

    /// Check a username/password pair.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        self.request_sweep();

        if username.is_empty() || password.is_empty() {
            return Err(AggregatorError::Credential);
        }

        let user = match self.db.get_user(username).await {
            Ok(user) => user,
            Err(e) if e.is_not_found() => {
                return Err(AggregatorError::Lookup("user not found".into()));
            }
            Err(e) => return Err(e.into()),
        };

        match self.hasher.verify(password, &user.password_hash) {
            Ok(true) => Ok(user),
            Ok(false) => Err(AggregatorError::Credential),
            Err(e) => {
                warn!(username, error = %e, "Stored password hash is unreadable");
                Err(AggregatorError::Credential)
            }
        }
    }

    /// Open a session for an authenticated account.
    pub async fn create_session(&self, user: &User) -> Result<Session> {
        let privileges = user
            .role_id
            .parse::<Role>()
            .map(Role::privileges)
            .unwrap_or_default();
        if !privileges.contains(&Privilege::Login) {
            return Err(AggregatorError::Privilege(format!(
                "account {} is not allowed to log in",
                user.username
            )));
        }

        let token = uuid::Uuid::new_v4().to_string();
        let record = self
            .db
            .create_session(
                &token,
                &user.username,
                &encode_privileges(&privileges),
                unix_timestamp(),
            )
            .await?;

        info!(username = %user.username, "Session created");
        Session::from_record(record)
    }

    /// Resolve a token to a live session and record its use.
    pub async fn validate_session(&self, token: &str) -> Result<Session> {
        self.request_sweep();

        if token.is_empty() {
            return Err(AggregatorError::InvalidToken);
        }

        let record = match self.db.get_session(token).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Err(AggregatorError::InvalidToken),
            Err(e) => return Err(e.into()),
        };

        let now = unix_timestamp();
        if self.is_expired(record.last_used_at, now) {
            if let Err(e) = self.db.delete_session(token).await {
                warn!(error = %e, "Failed to delete expired session");
            }
            debug!(username = %record.username, "Session expired");
            return Err(AggregatorError::SessionExpired);
        }

        self.db.touch_session(token, now).await?;
        let mut session = Session::from_record(record)?;
        session.last_used_at = now;
        Ok(session)
    }

    /// Remove a session (logout).
    pub async fn delete_session(&self, token: &str) -> Result<()> {
        if self.db.delete_session(token).await? {
            info!("Session deleted");
            Ok(())
        } else {
            Err(AggregatorError::not_found("Session", token))
        }
    }

    /// Delete every session idle beyond the timeout, at most once per
    /// cleanup interval. Only one sweep runs at a time.
    pub async fn sweep_expired(&self) -> SweepOutcome {
        let mut last_cleanup = self.last_cleanup.lock().await;
        if let Some(prev) = *last_cleanup {
            if prev.elapsed() < self.cleanup_interval {
                return SweepOutcome::Throttled;
            }
        }

        let tokens = match self.db.list_session_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Failed to list session tokens");
                return SweepOutcome::Aborted;
            }
        };

        let now = unix_timestamp();
        let mut removed = 0;
        for token in &tokens {
            let record = match self.db.get_session(token).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Failed to load session during sweep");
                    continue;
                }
            };
            if !self.is_expired(record.last_used_at, now) {
                continue;
            }
            match self.db.delete_session(token).await {
                Ok(_) => removed += 1,
                Err(e) => warn!(error = %e, "Failed to delete expired session"),
            }
        }

        *last_cleanup = Some(Instant::now());
        SweepOutcome::Completed {
            scanned: tokens.len(),
            removed,
        }
    }
}

#[async_trait]
impl Authorizer for SessionManager {
    async fn authorize(
        &self,
        token: &str,
        privileges: &[Privilege],
        oem_privileges: &[String],
    ) -> Result<Session> {
        let session = self.validate_session(token).await?;
        if let Some(missing) = privileges.iter().find(|p| !session.has(**p)) {
            return Err(AggregatorError::Privilege(format!(
                "user {} lacks privilege {missing}",
                session.username
            )));
        }
        if !oem_privileges.is_empty() {
            debug!(?oem_privileges, "OEM privileges are not enforced");
        }
        Ok(session)
    }
}

/// Run the expiry sweep whenever a trigger arrives and on a fixed period.
/// The task ends once the manager has been dropped.
pub fn spawn_sweeper(
    sessions: &Arc<SessionManager>,
    mut trigger: mpsc::Receiver<()>,
    period: Duration,
) -> JoinHandle<()> {
    let sessions = Arc::downgrade(sessions);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(MIN_SWEEP_PERIOD));
        interval.tick().await; // Skip first immediate tick
        loop {
            tokio::select! {
                msg = trigger.recv() => {
                    if msg.is_none() {
                        break;
                    }
                }
                _ = interval.tick() => {}
            }
            let Some(sessions) = sessions.upgrade() else {
                break;
            };
            match sessions.sweep_expired().await {
                SweepOutcome::Completed { scanned, removed } if removed > 0 => {
                    info!(scanned, removed, "Expired sessions removed");
                }
                outcome => debug!(?outcome, "Session sweep finished"),
            }
        }
        debug!("Session sweeper stopped");
    })
}
