use crate::representation::ElectionId;
use thiserror::Error;

/// What kind of P4Info object a symbolic name was looked up as.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SymbolKind {
    Table,
    Action,
    MatchField,
    ActionParam,
    Counter,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SymbolKind::Table => "table",
            SymbolKind::Action => "action",
            SymbolKind::MatchField => "match field",
            SymbolKind::ActionParam => "action parameter",
            SymbolKind::Counter => "counter",
        };
        f.write_str(s)
    }
}

/// Errors raised while resolving names or encoding values, before anything is sent.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CodecError {
    #[error("unknown {kind} '{name}'")]
    UnknownSymbol { kind: SymbolKind, name: String },
    #[error("value '{value}' does not fit in {bitwidth} bits of '{field}'")]
    ValueRange {
        field: String,
        value: String,
        bitwidth: i32,
    },
    #[error("invalid value '{value}' for '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
    #[error("table '{table}' requires match field '{field}'")]
    MissingMatchField { table: String, field: String },
    #[error("invalid priority {priority} for table '{table}': {reason}")]
    InvalidPriority {
        table: String,
        priority: i32,
        reason: &'static str,
    },
    #[error("match field '{field}' is declared as {declared}, got {given}")]
    MatchKind {
        field: String,
        declared: &'static str,
        given: &'static str,
    },
    #[error("cannot decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("device at {address} unreachable: {reason}")]
    Connection { address: String, reason: String },
    #[error("arbitration lost on device {device_id}: election id {ours} is not primary ({message})")]
    Arbitration {
        device_id: u64,
        ours: ElectionId,
        primary: Option<ElectionId>,
        message: String,
    },
    #[error("session lost primacy on device {device_id}")]
    LostPrimacy { device_id: u64 },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("entry {index} rejected by device: {code:?} {message}")]
    WriteRejected {
        index: usize,
        code: tonic::Code,
        message: String,
    },
    #[error("session is closed")]
    SessionClosed,
    #[error("device {device_id} gRPC error: {status}")]
    Grpc {
        device_id: u64,
        status: tonic::Status,
    },
    #[error("pipeline config error: {0}")]
    Pipeline(String),
    #[error("config file {path}: {error}")]
    ConfigFile {
        path: String,
        #[source]
        error: std::io::Error,
    },
}

impl Error {
    /// Re-attributes a write rejection to the position of the entry inside a batch.
    pub fn at_entry(self, index: usize) -> Error {
        match self {
            Error::WriteRejected { code, message, .. } => Error::WriteRejected {
                index,
                code,
                message,
            },
            other => other,
        }
    }

    pub fn is_lost_primacy(&self) -> bool {
        matches!(self, Error::LostPrimacy { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
