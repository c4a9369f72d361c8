pub mod enums;
pub mod wire;

pub use enums::{CommandStatus, CommandType, ParseEnumError, ServerStatus, ServiceState};

/// Header carrying the per-server agent credential.
pub const API_KEY_HEADER: &str = "X-API-Key";
/// Header carrying the fleet-wide enrollment secret used for self-registration.
pub const ENROLLMENT_TOKEN_HEADER: &str = "X-Enrollment-Token";
