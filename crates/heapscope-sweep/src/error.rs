use thiserror::Error;

use crate::literal::LiteralError;
use crate::path_table::PathId;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("unknown path id {0}")]
    UnknownPath(PathId),
    #[error("node {id} has excluded type {type_name}")]
    Excluded { id: PathId, type_name: String },
    #[error("node {id} is invalid: {reason}")]
    Invalid { id: PathId, reason: String },
    #[error("type of node {id} cannot be decoded: {reason}")]
    Undecodable { id: PathId, reason: String },
    #[error("node {0} does not address an object")]
    NotAnObject(PathId),
    #[error("{type_name} has no field {field:?}")]
    NoSuchField { type_name: String, field: String },
    #[error(transparent)]
    Literal(#[from] LiteralError),
}

pub type Result<T, E = SweepError> = std::result::Result<T, E>;
