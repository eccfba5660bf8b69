//! Domain Layer - Tokens, topology and the session state machine.
//!
//! Pure types with no I/O. The application layer drives them; the
//! infrastructure layer puts them on the wire.

/// OAuth credentials, token state and the renewal schedule.
pub mod token;

/// Topology modes and endpoint selection.
pub mod topology;

/// Streaming session state machine.
pub mod session;
