pub mod actions;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod history;
pub mod media;
pub mod registry;
pub mod segment;
pub mod send;
mod tags;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use dispatch::{BotContext, Dispatcher, Origin, Transport};
pub use engine::{Engine, GroupRequest, PsKeyDomain, Target};
pub use error::{ActionError, EngineError, LogError, MediaError};
pub use history::{MemoryMessageLog, MessageLog, NewMessage, StoredMessage};
pub use media::{MediaKind, MediaStore};
pub use registry::{canonical_action_name, ActionRegistry, Handler, Lookup};
pub use segment::SegmentCodec;
pub use send::{segments_to_engine_text, send_message};
