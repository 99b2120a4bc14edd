//! Mutation state machine phases

use std::fmt;

/// Steps of a mutation, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ReadTable,
    Validate,
    Mutate,
    WriteBackup,
    VerifyBackup,
    WritePrimary,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::ReadTable => "read-table",
            Phase::Validate => "validate",
            Phase::Mutate => "mutate",
            Phase::WriteBackup => "write-backup",
            Phase::VerifyBackup => "verify-backup",
            Phase::WritePrimary => "write-primary",
            Phase::Done => "done",
        };
        write!(f, "{}", s)
    }
}
