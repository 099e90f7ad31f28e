//! LightDB client core: resilient session, dispatch and request API.
//!
//! ```text
//!   LightDbClient ──▶ TransportSession ──▶ SecureChannel (DTLS)
//!        │
//!        └──poll──▶ coap::decode ──▶ MessageDispatcher ──▶ MessageHandler
//! ```

pub mod api;
pub mod dispatcher;
pub mod ids;
pub mod request;
pub mod session;

pub use api::{LightDbClient, PollReport};
pub use dispatcher::{Dispatch, MessageDispatcher, Notification, PacketMeta};
pub use ids::MessageIdAllocator;
pub use session::{SessionState, TransportSession};
