use tracing::{debug, error};

use super::{Command, DeviceError, SessionGuard, SessionManager};
use crate::metrics;

/// Routes named commands to the device through a per-user session.
#[derive(Clone)]
pub struct Dispatcher {
    sessions: SessionManager,
}

impl Dispatcher {
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Acquire (or refresh) the user's session, then send `command`.
    /// Nothing is written to the device when the session cannot be acquired.
    pub async fn dispatch(&self, user_id: &str, command: &Command) -> Result<(), DeviceError> {
        let mut session = match self.sessions.acquire(user_id).await {
            Ok(session) => session,
            Err(err) => {
                metrics::COMMANDS_DISPATCHED
                    .with_label_values(&[command.name(), "connection_error"])
                    .inc();
                return Err(err);
            }
        };
        let result = execute(&mut session, command).await;
        let outcome = if result.is_ok() { "ok" } else { "command_error" };
        metrics::COMMANDS_DISPATCHED
            .with_label_values(&[command.name(), outcome])
            .inc();
        result
    }
}

/// Write the instruction for `command` to an already-acquired session.
pub async fn execute(session: &mut SessionGuard, command: &Command) -> Result<(), DeviceError> {
    let instruction = command.instruction();
    match session.run(&instruction).await {
        Ok(output) => {
            debug!(
                command = command.name(),
                serial = session.serial().unwrap_or_default(),
                output = %output.trim(),
                "device instruction sent"
            );
            Ok(())
        }
        Err(source) => {
            error!(command = command.name(), instruction = %instruction, error = %source, "device instruction failed");
            Err(DeviceError::Command {
                instruction,
                source,
            })
        }
    }
}
