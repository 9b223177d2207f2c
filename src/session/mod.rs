//! Media sessions: request/sample routing, packet ordering and worker dispatch

mod failure;
mod media_session;
mod request;
mod work_queue;

pub use failure::{FailureState, FatalPolicy};
pub use media_session::MediaSession;
pub use request::{RequestPacket, RequestQueue};
pub use work_queue::WorkQueue;
