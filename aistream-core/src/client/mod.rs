//! Client half of the streaming protocol: a reconnecting transport that
//! rebuilds each answer from its chunks.

pub mod assembler;
pub mod backoff;
pub mod notice;
pub mod transport;

pub use assembler::ResponseAssembler;
pub use backoff::ReconnectPolicy;
pub use notice::{Notice, Notifier, Severity};
pub use transport::{ConnectionState, TransportManager};
