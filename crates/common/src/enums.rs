use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// What a queued command asks the agent to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Shutdown,
    Restart,
    Execute,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Shutdown => "shutdown",
            CommandType::Restart => "restart",
            CommandType::Execute => "execute",
        }
    }

    /// Shell string used when a power command is queued without explicit text.
    pub fn default_command_text(&self) -> Option<&'static str> {
        match self {
            CommandType::Shutdown => Some("shutdown -h now"),
            CommandType::Restart => Some("shutdown -r now"),
            CommandType::Execute => None,
        }
    }
}

impl FromStr for CommandType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shutdown" => Ok(CommandType::Shutdown),
            "restart" => Ok(CommandType::Restart),
            "execute" => Ok(CommandType::Execute),
            _ => Err(ParseEnumError::new("command type", s)),
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a queued command: `pending -> executing -> {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Executing => "executing",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }

    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (CommandStatus::Pending, CommandStatus::Executing)
                | (CommandStatus::Executing, CommandStatus::Completed)
                | (CommandStatus::Executing, CommandStatus::Failed)
        )
    }
}

impl FromStr for CommandStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommandStatus::Pending),
            "executing" => Ok(CommandStatus::Executing),
            "completed" => Ok(CommandStatus::Completed),
            "failed" => Ok(CommandStatus::Failed),
            _ => Err(ParseEnumError::new("command status", s)),
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    Offline,
    Warning,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Online => "online",
            ServerStatus::Offline => "offline",
            ServerStatus::Warning => "warning",
        }
    }
}

impl FromStr for ServerStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(ServerStatus::Online),
            "offline" => Ok(ServerStatus::Offline),
            "warning" => Ok(ServerStatus::Warning),
            _ => Err(ParseEnumError::new("server status", s)),
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Running,
    Stopped,
    Failed,
    Unknown,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
            ServiceState::Unknown => "unknown",
        }
    }

    /// Maps `systemctl is-active` output. Returns `None` when the unit is absent.
    pub fn from_systemctl(active: &str) -> Option<Self> {
        match active.trim() {
            "active" => Some(ServiceState::Running),
            "inactive" => Some(ServiceState::Stopped),
            "failed" => Some(ServiceState::Failed),
            _ => None,
        }
    }
}

impl FromStr for ServiceState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ServiceState::Running),
            "stopped" => Ok(ServiceState::Stopped),
            "failed" => Ok(ServiceState::Failed),
            "unknown" => Ok(ServiceState::Unknown),
            _ => Err(ParseEnumError::new("service status", s)),
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_status_only_moves_forward() {
        use CommandStatus::*;
        assert!(Pending.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Completed));
        assert!(Executing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Executing));
        assert!(!Executing.can_transition_to(Pending));
    }

    #[test]
    fn parses_wire_strings() {
        assert_eq!("restart".parse::<CommandType>(), Ok(CommandType::Restart));
        assert_eq!(
            "executing".parse::<CommandStatus>(),
            Ok(CommandStatus::Executing)
        );
        assert_eq!("warning".parse::<ServerStatus>(), Ok(ServerStatus::Warning));
        let err = "rebooting".parse::<CommandStatus>().unwrap_err();
        assert_eq!(err.value, "rebooting");
    }

    #[test]
    fn systemctl_mapping_skips_missing_units() {
        assert_eq!(
            ServiceState::from_systemctl("active\n"),
            Some(ServiceState::Running)
        );
        assert_eq!(
            ServiceState::from_systemctl("inactive"),
            Some(ServiceState::Stopped)
        );
        assert_eq!(ServiceState::from_systemctl("unknown"), None);
    }

    #[test]
    fn power_commands_have_default_text() {
        assert_eq!(
            CommandType::Restart.default_command_text(),
            Some("shutdown -r now")
        );
        assert_eq!(CommandType::Execute.default_command_text(), None);
    }
}
