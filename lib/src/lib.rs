pub mod backoff;
pub mod bootstrap;
pub mod compute;
pub mod credentials;
pub mod error;
pub mod gce_metadata;
pub mod idle;
pub mod images;
pub mod keepalive;
pub mod metadata;
pub mod node;
pub mod provision;
pub mod settings;
pub mod ssh;
pub mod ssh_config;
pub mod teardown;
pub mod verify;
pub mod who;

use execute::Execute;
use log::debug;
use std::io;
use std::process::{Command, Stdio};

use error::{Error, Result};

/// Runs `command` to completion and returns its stdout. A non-zero exit
/// carries stderr in the error.
pub fn command_output(mut command: Command) -> Result<String> {
    debug!("run: {:?}", command);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let output = command.execute_output()?;
    match output.status.code() {
        Some(0) => Ok(String::from_utf8_lossy(&output.stdout).to_string()),
        Some(code) => Err(Error::Io(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "{:?} exited with {}: {}",
                command.get_program(),
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ))),
        None => Err(Error::Io(io::Error::new(
            io::ErrorKind::Interrupted,
            "interrupted",
        ))),
    }
}
