//! Verification session management.

mod session;

pub use session::{
    SessionError, SessionManager, SessionStatus, VerificationSession, WorkingField,
};
