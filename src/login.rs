use crate::config::{AuthConfig, Credential, LimitAction};
use crate::dataset::Dataset;
use crate::error::{DashboardError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

/// Where a session stands with respect to the login gate
///
/// Created locked with no failures. Only [`AuthGate::login`] produces new
/// values; hosts keep the returned state and hand it back on the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub authenticated: bool,
    pub failed_attempts: u32,

    /// Set only by the lockout policy
    pub locked_until: Option<Instant>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate check performed before any dashboard content is produced
    pub fn require_unlocked(&self) -> Result<()> {
        if self.authenticated {
            Ok(())
        } else {
            Err(DashboardError::auth("login required"))
        }
    }
}

/// Result of one login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials accepted; the host must re-render the whole dashboard
    Unlocked,
    /// Wrong credentials, `attempts_left` before the retry limit is hit
    Rejected { attempts_left: u32 },
    /// The retry limit was reached by this attempt
    TooManyAttempts,
    /// Lockout policy only: the attempt was refused without checking credentials
    CoolingDown { retry_after: Duration },
}

impl LoginOutcome {
    pub fn message(&self) -> String {
        match self {
            LoginOutcome::Unlocked => "Login successful".to_string(),
            LoginOutcome::Rejected { .. } => "Invalid credentials".to_string(),
            LoginOutcome::TooManyAttempts => "Too many failed attempts".to_string(),
            LoginOutcome::CoolingDown { retry_after } => {
                format!("Too many failed attempts, try again in {}s", retry_after.as_secs().max(1))
            }
        }
    }

    /// Everything except `Unlocked` becomes an `Auth` error
    pub fn into_result(self) -> Result<()> {
        match self {
            LoginOutcome::Unlocked => Ok(()),
            other => Err(DashboardError::auth(other.message())),
        }
    }
}

/// Fixed-credential login gate with bounded retry tracking
///
/// This is an access gate for a single dashboard, not a security system:
/// passwords are compared as given.
#[derive(Debug, Clone)]
pub struct AuthGate {
    credentials: Vec<Credential>,
    max_attempts: u32,
    on_limit: LimitAction,
}

impl AuthGate {
    pub fn new(credentials: Vec<Credential>, max_attempts: u32, on_limit: LimitAction) -> Self {
        Self {
            credentials,
            max_attempts: max_attempts.max(1),
            on_limit,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.credentials.clone(), config.max_attempts, config.on_limit)
    }

    /// Exact match against the credential table
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        self.credentials
            .iter()
            .any(|c| c.username == username && c.password == password)
    }

    pub fn login(&self, state: SessionState, username: &str, password: &str) -> (SessionState, LoginOutcome) {
        self.login_at(state, username, password, Instant::now())
    }

    /// Applies one login attempt to `state`
    ///
    /// # Arguments
    /// * `state` - Current session state (consumed)
    /// * `username` / `password` - Submitted credentials
    /// * `now` - Clock reading used by the lockout policy
    ///
    /// # Returns
    /// * The next session state and what the user should be told
    ///
    /// # Notes
    /// * An unlocked state is terminal: it is returned unchanged
    /// * Under [`LimitAction::Reset`] the counter drops back to zero when the
    ///   limit is hit and later attempts are checked normally
    pub fn login_at(
        &self,
        state: SessionState,
        username: &str,
        password: &str,
        now: Instant,
    ) -> (SessionState, LoginOutcome) {
        if state.authenticated {
            return (state, LoginOutcome::Unlocked);
        }

        if let Some(until) = state.locked_until {
            if now < until {
                log::warn!("login attempt for '{}' refused during cooldown", username);
                return (
                    state,
                    LoginOutcome::CoolingDown {
                        retry_after: until - now,
                    },
                );
            }
        }

        if self.authenticate(username, password) {
            log::info!("user '{}' logged in", username);
            let next = SessionState {
                authenticated: true,
                failed_attempts: 0,
                locked_until: None,
            };
            return (next, LoginOutcome::Unlocked);
        }

        let failed_attempts = state.failed_attempts + 1;
        if failed_attempts < self.max_attempts {
            log::info!("failed login for '{}' ({}/{})", username, failed_attempts, self.max_attempts);
            let next = SessionState {
                failed_attempts,
                locked_until: None,
                ..state
            };
            return (
                next,
                LoginOutcome::Rejected {
                    attempts_left: self.max_attempts - failed_attempts,
                },
            );
        }

        log::warn!("retry limit reached for '{}'", username);
        let locked_until = match self.on_limit {
            LimitAction::Reset => None,
            LimitAction::Lockout { cooldown_secs } => Some(now + Duration::from_secs(cooldown_secs)),
        };
        let next = SessionState {
            authenticated: false,
            failed_attempts: 0,
            locked_until,
        };
        (next, LoginOutcome::TooManyAttempts)
    }
}

/// Per-browser session held by a host
#[derive(Debug, Clone)]
pub struct Session {
    pub state: SessionState,

    /// Datasets uploaded during this session, by name
    pub uploads: HashMap<String, Arc<Dataset>>,

    pub expires_at: SystemTime,
}

/// In-memory session registry keyed by random session ids
///
/// Sessions live only as long as the process does.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    duration: Duration,
}

impl SessionStore {
    pub fn new(duration: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            duration,
        }
    }

    /// Creates a new locked session and returns its id
    pub fn create(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            state: SessionState::new(),
            uploads: HashMap::new(),
            expires_at: SystemTime::now() + self.duration,
        };
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(session_id.clone(), session);
        }
        session_id
    }

    /// Runs `f` against a live session
    ///
    /// # Returns
    /// * `None` when the id is unknown or the session has expired; expired
    ///   sessions are dropped on the way
    pub fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.write().ok()?;
        let expired = sessions.get(session_id)?.expires_at <= SystemTime::now();
        if expired {
            sessions.remove(session_id);
            return None;
        }
        sessions.get_mut(session_id).map(f)
    }

    pub fn state(&self, session_id: &str) -> Option<SessionState> {
        self.with_session(session_id, |session| session.state)
    }

    pub fn remove(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(session_id);
        }
    }

    /// Drops every expired session, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        match self.sessions.write() {
            Ok(mut sessions) => {
                let before = sessions.len();
                sessions.retain(|_, session| session.expires_at > now);
                before - sessions.len()
            }
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(on_limit: LimitAction) -> AuthGate {
        AuthGate::new(
            vec![Credential::new("admin", "admin123"), Credential::new("analyst", "charts")],
            3,
            on_limit,
        )
    }

    #[test]
    fn only_exact_pairs_authenticate() {
        let gate = gate(LimitAction::Reset);
        assert!(gate.authenticate("admin", "admin123"));
        assert!(gate.authenticate("analyst", "charts"));
        assert!(!gate.authenticate("admin", "charts"));
        assert!(!gate.authenticate("Admin", "admin123"));
        assert!(!gate.authenticate("", ""));
    }

    #[test]
    fn failures_count_down_then_reset() {
        let gate = gate(LimitAction::Reset);
        let (state, outcome) = gate.login(SessionState::new(), "admin", "nope");
        assert_eq!(outcome, LoginOutcome::Rejected { attempts_left: 2 });
        assert_eq!(state.failed_attempts, 1);

        let (state, outcome) = gate.login(state, "admin", "nope");
        assert_eq!(outcome, LoginOutcome::Rejected { attempts_left: 1 });

        let (state, outcome) = gate.login(state, "admin", "nope");
        assert_eq!(outcome, LoginOutcome::TooManyAttempts);
        assert_eq!(state.failed_attempts, 0);
        assert!(!state.authenticated);
    }

    #[test]
    fn reset_policy_still_accepts_login_after_three_failures() {
        let gate = gate(LimitAction::Reset);
        let mut state = SessionState::new();
        for _ in 0..3 {
            state = gate.login(state, "admin", "wrong").0;
        }
        let (state, outcome) = gate.login(state, "admin", "admin123");
        assert_eq!(outcome, LoginOutcome::Unlocked);
        assert!(state.authenticated);
        assert!(state.require_unlocked().is_ok());
    }

    #[test]
    fn lockout_policy_refuses_until_cooldown_passes() {
        let gate = gate(LimitAction::Lockout { cooldown_secs: 30 });
        let start = Instant::now();
        let mut state = SessionState::new();
        for _ in 0..3 {
            state = gate.login_at(state, "admin", "wrong", start).0;
        }
        assert_eq!(state.locked_until, Some(start + Duration::from_secs(30)));

        let (state, outcome) = gate.login_at(state, "admin", "admin123", start + Duration::from_secs(10));
        assert_eq!(
            outcome,
            LoginOutcome::CoolingDown {
                retry_after: Duration::from_secs(20)
            }
        );
        assert!(!state.authenticated);

        let (state, outcome) = gate.login_at(state, "admin", "admin123", start + Duration::from_secs(31));
        assert_eq!(outcome, LoginOutcome::Unlocked);
        assert_eq!(state.locked_until, None);
    }

    #[test]
    fn unlocked_is_terminal() {
        let gate = gate(LimitAction::Reset);
        let (state, _) = gate.login(SessionState::new(), "admin", "admin123");
        let (again, outcome) = gate.login(state, "admin", "wrong");
        assert_eq!(outcome, LoginOutcome::Unlocked);
        assert_eq!(again, state);
    }

    #[test]
    fn locked_state_fails_the_gate_check() {
        let err = SessionState::new().require_unlocked().unwrap_err();
        assert_eq!(err.kind(), "auth");
        assert!(LoginOutcome::Rejected { attempts_left: 1 }.into_result().is_err());
    }

    #[test]
    fn session_store_tracks_state_per_id() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create();
        assert_eq!(store.state(&id), Some(SessionState::new()));

        store.with_session(&id, |session| session.state.authenticated = true);
        assert!(store.state(&id).unwrap().authenticated);

        assert_eq!(store.state("unknown"), None);
        store.remove(&id);
        assert_eq!(store.state(&id), None);
    }

    #[test]
    fn expired_sessions_disappear() {
        let store = SessionStore::new(Duration::ZERO);
        let id = store.create();
        assert_eq!(store.state(&id), None);

        let other = store.create();
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.state(&other), None);
    }
}
