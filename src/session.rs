//! Test/session lifecycle against the test engine.
//!
//! One controller drives one test name at a time through
//! `Absent -> Created -> Running -> Stopped -> Absent`. Creation steps are
//! fatal; stop and teardown are best-effort so they can run on any exit path.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::platform::{EngineError, StopMode, TestEngine};

pub const DEFAULT_FIXED_STEP_MS: u32 = 1000;
pub const DEFAULT_SCHEDULE_TYPE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Absent,
    Created,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Absent => "absent",
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create test {test}")]
    TestCreateFailed {
        test: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to create session {test}/{session}")]
    SessionCreateFailed {
        test: String,
        session: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to start session {test}/{session}")]
    SessionStartFailed {
        test: String,
        session: String,
        #[source]
        source: EngineError,
    },

    #[error("cannot {action} a session that is {from}")]
    InvalidTransition { from: SessionState, action: &'static str },
}

/// Everything needed to create and start one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub test: String,
    pub database: String,
    pub session: String,
    pub description: String,
    pub fixed_step_ms: u32,
    pub schedule_type: u32,
    pub logging: bool,
}

impl SessionParams {
    pub fn new(test: &str, database: &str, session: &str) -> Self {
        Self {
            test: test.to_string(),
            database: database.to_string(),
            session: session.to_string(),
            description: format!("hilbench {session}"),
            fixed_step_ms: DEFAULT_FIXED_STEP_MS,
            schedule_type: DEFAULT_SCHEDULE_TYPE,
            logging: true,
        }
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    pub fn with_fixed_step(mut self, fixed_step_ms: u32) -> Self {
        self.fixed_step_ms = fixed_step_ms;
        self
    }

    pub fn with_schedule(mut self, schedule_type: u32) -> Self {
        self.schedule_type = schedule_type;
        self
    }

    /// `test/session`, as the data logger addresses a run.
    pub fn path(&self) -> String {
        format!("{}/{}", self.test, self.session)
    }
}

pub struct SessionController<'a, E: TestEngine + ?Sized> {
    engine: &'a E,
    state: SessionState,
    /// Test and session of the last `start`, kept for teardown.
    active: Option<(String, String)>,
}

impl<'a, E: TestEngine + ?Sized> SessionController<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self {
            engine,
            state: SessionState::Absent,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Delete any prior session and test with the names in `params`.
    /// Absence is not an error; any other refusal is logged and tolerated.
    pub async fn reset(&mut self, params: &SessionParams) {
        let test = params.test.as_str();
        let session = params.session.as_str();
        match self.engine.delete_session(test, session).await {
            Ok(()) => debug!(test, session, "prior session deleted"),
            Err(e) if e.is_not_found() => debug!(test, session, "no prior session to delete"),
            Err(e) => warn!(test, session, error = %e, "failed to delete prior session"),
        }
        match self.engine.delete_test(test).await {
            Ok(()) => debug!(test, "prior test deleted"),
            Err(e) if e.is_not_found() => debug!(test, "no prior test to delete"),
            Err(e) => warn!(test, error = %e, "failed to delete prior test"),
        }
        self.state = SessionState::Absent;
        self.active = None;
    }

    /// Create the test and session, then start the session.
    pub async fn start(&mut self, params: &SessionParams) -> Result<(), SessionError> {
        if self.state != SessionState::Absent {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                action: "start",
            });
        }

        self.engine
            .create_test(&params.test, &params.database, &params.description, params.fixed_step_ms)
            .await
            .map_err(|source| SessionError::TestCreateFailed {
                test: params.test.clone(),
                source,
            })?;
        self.active = Some((params.test.clone(), params.session.clone()));

        self.engine
            .create_session(
                &params.test,
                &params.session,
                &params.description,
                params.schedule_type,
                !params.logging,
            )
            .await
            .map_err(|source| SessionError::SessionCreateFailed {
                test: params.test.clone(),
                session: params.session.clone(),
                source,
            })?;
        self.state = SessionState::Created;

        self.engine
            .start_session(&params.test, &params.session)
            .await
            .map_err(|source| SessionError::SessionStartFailed {
                test: params.test.clone(),
                session: params.session.clone(),
                source,
            })?;
        self.state = SessionState::Running;

        info!(
            test = %params.test,
            session = %params.session,
            database = %params.database,
            logging = params.logging,
            "session running"
        );
        Ok(())
    }

    /// Stop the running session. Safe to call repeatedly; engine errors are
    /// logged and swallowed.
    pub async fn stop(&mut self, mode: StopMode) {
        if self.state == SessionState::Stopped {
            debug!(?mode, "session already stopped");
            return;
        }
        match self.engine.stop_session(mode).await {
            Ok(()) => info!(?mode, "session stopped"),
            Err(e) if self.state == SessionState::Running => {
                warn!(?mode, error = %e, "session stop reported an error")
            }
            Err(e) => debug!(?mode, error = %e, "nothing to stop"),
        }
        if self.state == SessionState::Running {
            self.state = SessionState::Stopped;
        }
    }

    /// Best-effort delete of the session from the last `start`.
    pub async fn teardown(&mut self) {
        if let Some((test, session)) = self.active.take() {
            match self.engine.delete_session(&test, &session).await {
                Ok(()) => debug!(%test, %session, "session deleted"),
                Err(e) => warn!(%test, %session, error = %e, "could not delete session"),
            }
        }
        self.state = SessionState::Absent;
    }
}
