//! Process exit statuses read by the supervisor that restarts us

use std::fmt;
use std::process::ExitCode;

/// Every way the process can end. Zero is deliberately absent: the tunnel is
/// meant to run forever, so any exit is a failure or an operator stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// The SSH session or one of its forwards could not be opened
    SessionFailed,
    /// A required environment variable is absent
    MissingField,
    /// A variable is present but unusable (port, host resolution)
    InvalidValue,
    /// A bind-address literal could not be parsed
    MalformedLiteral,
    /// Remote and local bind sequences differ in length
    BindCountMismatch,
    /// No key file and no usable password
    MissingCredentials,
    /// The status map reported a forward down
    TunnelDead,
    /// The remote side of a forward refused the connection
    RemoteUnreachable,
    /// SIGINT or SIGTERM
    Interrupted,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::SessionFailed => 1,
            ExitStatus::MissingField => 2,
            ExitStatus::InvalidValue => 3,
            ExitStatus::MalformedLiteral => 4,
            ExitStatus::BindCountMismatch => 5,
            ExitStatus::MissingCredentials => 6,
            ExitStatus::TunnelDead => 10,
            ExitStatus::RemoteUnreachable => 11,
            ExitStatus::Interrupted => 130,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (exit code {})", self, self.code())
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}
