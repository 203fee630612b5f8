//! Wire vocabulary shared by the relay server and the client session manager.
//!
//! Events are internally tagged (`{"type": "..."}`) so both ends dispatch on
//! a single discriminant; the data model serializes camelCase for the web
//! front end. Nothing here touches the network — this crate is pure types.

mod event;
mod message;

pub use event::{ClientEvent, ServerEvent};
pub use message::{AiConversation, ChatMessage, CodeSnippet, now_millis};
