use std::fmt;
use std::str::FromStr;

use crate::errors::SchedulerError;

/// OS signals that may be forwarded to a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalName {
    Term,
    Kill,
    Int,
    Hup,
    Quit,
    Usr1,
    Usr2,
    Stop,
    Cont,
}

impl SignalName {
    /// Name as accepted by `kill -s`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalName::Term => "TERM",
            SignalName::Kill => "KILL",
            SignalName::Int => "INT",
            SignalName::Hup => "HUP",
            SignalName::Quit => "QUIT",
            SignalName::Usr1 => "USR1",
            SignalName::Usr2 => "USR2",
            SignalName::Stop => "STOP",
            SignalName::Cont => "CONT",
        }
    }
}

impl fmt::Display for SignalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalName {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "TERM" => Ok(SignalName::Term),
            "KILL" => Ok(SignalName::Kill),
            "INT" => Ok(SignalName::Int),
            "HUP" => Ok(SignalName::Hup),
            "QUIT" => Ok(SignalName::Quit),
            "USR1" => Ok(SignalName::Usr1),
            "USR2" => Ok(SignalName::Usr2),
            "STOP" => Ok(SignalName::Stop),
            "CONT" => Ok(SignalName::Cont),
            _ => Err(SchedulerError::InvalidSignal(s.to_string())),
        }
    }
}
