pub mod execution;

use fleetwatch_common::wire::Command;
use fleetwatch_common::CommandType;

/// Power commands take the host down with the agent on it, so their result
/// has to be on the wire before they run.
pub fn reports_before_running(command: &Command) -> bool {
    matches!(
        command.command_type,
        CommandType::Shutdown | CommandType::Restart
    )
}

pub fn power_acknowledgement(command: &Command) -> String {
    match command.command_type {
        CommandType::Shutdown => format!("Shutdown initiated: {}", command.command),
        CommandType::Restart => format!("Restart initiated: {}", command.command),
        CommandType::Execute => String::new(),
    }
}
