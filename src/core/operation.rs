use serde::{Deserialize, Serialize};

/// Class of a record operation, as sent in the operation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Read,
    ReadHeader,
    Write,
    CdtRead,
    CdtModify,
    MapRead,
    MapModify,
    Add,
    ExpRead,
    ExpModify,
    Append,
    Prepend,
    Touch,
    BitRead,
    BitModify,
    Delete,
    HllRead,
    HllModify,
}

impl OperationType {
    /// Wire value of the operation class.
    ///
    /// Collection reads and modifies share the same value regardless of the
    /// collection type.
    pub fn wire_code(&self) -> u8 {
        match self {
            OperationType::Read | OperationType::ReadHeader => 1,
            OperationType::Write => 2,
            OperationType::CdtRead | OperationType::MapRead => 3,
            OperationType::CdtModify | OperationType::MapModify => 4,
            OperationType::Add => 5,
            OperationType::ExpRead => 7,
            OperationType::ExpModify => 8,
            OperationType::Append => 9,
            OperationType::Prepend => 10,
            OperationType::Touch => 11,
            OperationType::BitRead => 12,
            OperationType::BitModify => 13,
            OperationType::Delete => 14,
            OperationType::HllRead => 15,
            OperationType::HllModify => 16,
        }
    }

    /// Whether the operation can change data on the server.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            OperationType::Read
                | OperationType::ReadHeader
                | OperationType::CdtRead
                | OperationType::MapRead
                | OperationType::ExpRead
                | OperationType::BitRead
                | OperationType::HllRead
        )
    }
}

/// Read/write classification of a whole command.
///
/// Only write-class commands can ever be reported as in-doubt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Read,
    Write,
}

impl CommandKind {
    /// A command is a write as soon as one of its operations writes.
    pub fn from_operations(ops: &[OperationType]) -> Self {
        if ops.iter().any(OperationType::is_write) {
            CommandKind::Write
        } else {
            CommandKind::Read
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, CommandKind::Write)
    }
}
