//! Request handlers. These run on blocking workers and write through a
//! [`Responder`](crate::transport::Responder).

pub mod control;
pub mod mjpeg;
pub mod snapshot;

pub use control::{CommandInterpreter, ControlCommand};
pub use mjpeg::StreamSession;
pub use snapshot::capture_jpeg;
