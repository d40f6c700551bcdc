//! Request envelopes in, response envelopes out.
//!
//! Every transport funnels through [`Dispatcher`], so failure handling is the
//! same everywhere: unknown actions, typed handler errors and panics all come
//! back as a failed envelope carrying the caller's echo.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use cqbridge_contracts::{ActionRequest, ActionResponse, EventContext, MessageType, QuickReply};
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use crate::engine::{Engine, Target};
use crate::error::ActionError;
use crate::history::MessageLog;
use crate::media::MediaStore;
use crate::registry::{ActionRegistry, Lookup};
use crate::segment::SegmentCodec;
use crate::send::send_message;

const FALLBACK_RESPONSE: &[u8] =
    br#"{"status":"failed","retcode":100,"data":{"data":"internal error"},"echo":null}"#;

/// Everything a handler may touch, for one bot.
#[derive(Clone, Copy)]
pub struct BotContext<'a> {
    pub bot_id: i64,
    pub engine: &'a dyn Engine,
    pub history: &'a dyn MessageLog,
    pub media: &'a MediaStore,
    pub codec: &'a SegmentCodec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    WsClient,
    WsServer,
    Http,
    QuickReply,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::WsClient => "ws_client",
            Transport::WsServer => "ws_server",
            Transport::Http => "http",
            Transport::QuickReply => "quick_reply",
        }
    }
}

/// Where a request came from; used for logging only.
#[derive(Debug, Clone, Copy)]
pub struct Origin<'a> {
    pub bot_id: i64,
    pub transport: Transport,
    pub peer: &'a str,
}

pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    lookup: Lookup,
    engine: Arc<dyn Engine>,
    history: Arc<dyn MessageLog>,
    media: MediaStore,
    codec: SegmentCodec,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ActionRegistry>,
        lookup: Lookup,
        engine: Arc<dyn Engine>,
        history: Arc<dyn MessageLog>,
        media: MediaStore,
        codec: SegmentCodec,
    ) -> Self {
        Self {
            registry,
            lookup,
            engine,
            history,
            media,
            codec,
        }
    }

    pub fn codec(&self) -> &SegmentCodec {
        &self.codec
    }

    pub fn context(&self, bot_id: i64) -> BotContext<'_> {
        BotContext {
            bot_id,
            engine: self.engine.as_ref(),
            history: self.history.as_ref(),
            media: &self.media,
            codec: &self.codec,
        }
    }

    /// Handles one raw request frame and returns the serialized response.
    pub fn dispatch(&self, raw: &[u8], origin: &Origin<'_>) -> Vec<u8> {
        let response = self.dispatch_request(raw, origin);
        serde_json::to_vec(&response).unwrap_or_else(|err| {
            error!(
                bot_id = origin.bot_id,
                transport = origin.transport.as_str(),
                error = %err,
                "response serialization failed"
            );
            FALLBACK_RESPONSE.to_vec()
        })
    }

    pub fn dispatch_request(&self, raw: &[u8], origin: &Origin<'_>) -> ActionResponse {
        let mut envelope: Value = match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(err) => return self.reject(None, &err, origin),
        };
        let echo = envelope
            .as_object_mut()
            .and_then(|object| object.remove("echo"))
            .filter(|echo| !echo.is_null());
        let request: ActionRequest = match serde_json::from_value(envelope) {
            Ok(request) => request,
            Err(err) => return self.reject(echo, &err, origin),
        };
        self.dispatch_action(&request.action, request.params, echo, origin)
    }

    fn reject(
        &self,
        echo: Option<Value>,
        err: &serde_json::Error,
        origin: &Origin<'_>,
    ) -> ActionResponse {
        warn!(
            bot_id = origin.bot_id,
            transport = origin.transport.as_str(),
            peer = origin.peer,
            error = %err,
            "unparseable request envelope"
        );
        ActionResponse::failure("invalid request").with_echo(echo)
    }

    /// Runs `action` with `params`. The echo is returned untouched.
    pub fn dispatch_action(
        &self,
        action: &str,
        params: Value,
        echo: Option<Value>,
        origin: &Origin<'_>,
    ) -> ActionResponse {
        debug!(
            bot_id = origin.bot_id,
            transport = origin.transport.as_str(),
            action,
            "action received"
        );
        let Some(handler) = self.registry.resolve(action, self.lookup) else {
            return ActionResponse::failure(&ActionError::UnknownAction.to_string()).with_echo(echo);
        };
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let ctx = self.context(origin.bot_id);
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&ctx, &params)));
        let response = match outcome {
            Ok(Ok(data)) => ActionResponse::ok(data),
            Ok(Err(err)) => {
                if err.is_internal() {
                    error!(
                        bot_id = origin.bot_id,
                        action,
                        transport = origin.transport.as_str(),
                        peer = origin.peer,
                        error = %err,
                        "action failed"
                    );
                }
                ActionResponse::failure(&err.to_string())
            }
            Err(panic) => {
                error!(
                    bot_id = origin.bot_id,
                    action,
                    transport = origin.transport.as_str(),
                    peer = origin.peer,
                    panic = %panic_message(panic.as_ref()),
                    "action panicked"
                );
                ActionResponse::failure("internal error")
            }
        };
        response.with_echo(echo)
    }

    /// Sends the reply an HTTP event receiver answered with, addressed from
    /// the event it was answering.
    pub fn send_quick_reply(
        &self,
        event: &Value,
        reply: QuickReply,
        origin: &Origin<'_>,
    ) -> ActionResponse {
        let Some(message) = reply.reply else {
            return ActionResponse::ok(json!({ "message_id": 0 }));
        };
        let event = EventContext::from_event(event);
        let target = match MessageType::resolve(&event.message_type, event.group_id) {
            MessageType::Group => Target::group(event.group_id),
            MessageType::Private => Target::private(event.user_id),
        };
        let prefix = if reply.at_sender {
            format!("[@{}]", event.user_id)
        } else {
            String::new()
        };

        let ctx = self.context(origin.bot_id);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            send_message(&ctx, &target, message, &prefix)
        }));
        match outcome {
            Ok(Ok(data)) => ActionResponse::ok(data),
            Ok(Err(err)) => {
                warn!(
                    bot_id = origin.bot_id,
                    transport = origin.transport.as_str(),
                    peer = origin.peer,
                    error = %err,
                    "quick reply failed"
                );
                ActionResponse::failure(&err.to_string())
            }
            Err(panic) => {
                error!(
                    bot_id = origin.bot_id,
                    transport = origin.transport.as_str(),
                    peer = origin.peer,
                    panic = %panic_message(panic.as_ref()),
                    "quick reply panicked"
                );
                ActionResponse::failure("internal error")
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
