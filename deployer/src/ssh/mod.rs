//! Remote command execution over SSH

pub mod command;
pub mod context;
pub mod shell;

pub use command::{CommandOutput, RemoteCommand};
pub use context::{PasswordPrompt, SshContext, TerminalPrompt};
pub use shell::RemoteShell;

/// Leading argv element requesting privilege escalation
pub const SUDO: &str = "sudo";

/// Exit status ssh reserves for its own failures, including dropped connections
pub const SSH_DISCONNECT_EXIT_CODE: i32 = 255;
