pub mod client;
pub mod codec;
mod error;
pub mod frame;
pub mod session;

// Public re-exports for external use
pub use self::{
    client::{Client, ClientBuilder, ClientOption},
    codec::Codec,
    error::Error,
    frame::{
        asdu::{Asdu, Cause, CauseOfTransmission, CommonAddr, TypeID},
        cproc::{DoubleCommandInfo, SingleCommandInfo},
        Apdu,
    },
    session::{
        create, create_with_stream, Request, Session, SessionConfig, SessionEvent,
        SessionEventLoop, SessionLifecycleState,
    },
};
