use super::{
    frame::asdu::{CauseOfTransmission, TypeID},
    session::Request,
};
use std::result::Result as StdResult;
use thiserror::Error;

pub type Result<T> = StdResult<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connect timeout")]
    ErrConnectTimeout,
    #[error("asdu: [type identifier: {0:?}] doesn't match call")]
    ErrTypeIDNotMatch(TypeID),
    #[error("asdu: [cause of transmission: {0:?}] for command not standard requirement")]
    ErrCmdCause(CauseOfTransmission),

    #[error("SendError {0}")]
    ErrSendRequest(#[from] tokio::sync::mpsc::error::SendError<Request>),

    #[error("use of closed connection")]
    ErrUseClosedConnection,
    #[error("data transfer not active")]
    ErrNotActive,

    #[error(transparent)]
    ErrAnyHow(#[from] anyhow::Error),
}
