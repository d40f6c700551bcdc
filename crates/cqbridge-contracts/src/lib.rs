use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const PROTOCOL_VERSION: &str = "v11";
pub const APP_NAME: &str = "cqbridge";

pub const RETCODE_OK: i64 = 0;
pub const RETCODE_FAILED: i64 = 100;

include!(concat!(env!("OUT_DIR"), "/schemas.rs"));

/// Names of the embedded wire schemas, sorted.
pub fn schema_names() -> impl Iterator<Item = &'static str> {
    EMBEDDED_SCHEMAS.iter().map(|(name, _)| *name)
}

/// Returns the embedded body of `contracts/v1/<name>`.
pub fn schema_body(name: &str) -> Option<&'static str> {
    EMBEDDED_SCHEMAS
        .iter()
        .find(|(schema_name, _)| *schema_name == name)
        .map(|(_, body)| *body)
}

/// One typed unit of message content.
///
/// `data` values are always strings on the wire we emit. Numbers and booleans
/// sent by clients (`{"qq": 12345}`) are accepted and stringified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSegment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "stringly_map")]
    pub data: BTreeMap<String, String>,
}

impl MessageSegment {
    pub fn new<'a>(kind: &str, pairs: impl IntoIterator<Item = (&'a str, String)>) -> Self {
        Self {
            kind: kind.to_string(),
            data: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text", [("text", text.into())])
    }

    pub fn error(raw: impl Into<String>) -> Self {
        Self::new("error", [("error", raw.into())])
    }

    /// Field value, or `""` when the field is absent.
    pub fn get(&self, key: &str) -> &str {
        self.data.get(key).map(String::as_str).unwrap_or("")
    }
}

fn stringly_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Map<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

/// A message as clients may send it: segment array, single segment, or a
/// string carrying `[CQ:...]` inline tags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageInput {
    Segments(Vec<MessageSegment>),
    Segment(MessageSegment),
    Text(String),
}

impl From<&str> for MessageInput {
    fn from(value: &str) -> Self {
        MessageInput::Text(value.to_string())
    }
}

impl From<Vec<MessageSegment>> for MessageInput {
    fn from(value: Vec<MessageSegment>) -> Self {
        MessageInput::Segments(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Private,
    Group,
}

impl MessageType {
    /// Picks the target the way the protocol does: an explicit
    /// `message_type` wins, otherwise a non-zero group id means group.
    pub fn resolve(message_type: &str, group_id: i64) -> Self {
        match message_type {
            "group" => MessageType::Group,
            "private" => MessageType::Private,
            _ if group_id != 0 => MessageType::Group,
            _ => MessageType::Private,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Private => "private",
            MessageType::Group => "group",
        }
    }

    /// The engine's numeric message kind.
    pub fn engine_code(self) -> i64 {
        match self {
            MessageType::Private => 1,
            MessageType::Group => 2,
        }
    }

    pub fn from_engine_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(MessageType::Private),
            2 => Some(MessageType::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub echo: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResponse {
    pub status: ResponseStatus,
    pub retcode: i64,
    pub data: Value,
    pub echo: Value,
}

impl ActionResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: ResponseStatus::Ok,
            retcode: RETCODE_OK,
            data,
            echo: Value::Null,
        }
    }

    pub fn failed(data: Value) -> Self {
        Self {
            status: ResponseStatus::Failed,
            retcode: RETCODE_FAILED,
            data,
            echo: Value::Null,
        }
    }

    /// Failed envelope carrying `{"data": message}`.
    pub fn failure(message: &str) -> Self {
        Self::failed(json!({ "data": message }))
    }

    pub fn with_echo(mut self, echo: Option<Value>) -> Self {
        self.echo = echo.unwrap_or(Value::Null);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Body an HTTP event receiver may answer with to reply in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuickReply {
    #[serde(default)]
    pub reply: Option<MessageInput>,
    #[serde(default)]
    pub at_sender: bool,
}

/// Routing fields captured from a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub message_type: String,
    pub group_id: i64,
    pub user_id: i64,
}

impl EventContext {
    pub fn from_event(event: &Value) -> Self {
        Self {
            message_type: event
                .get("message_type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            group_id: lenient_i64(event.get("group_id")),
            user_id: lenient_i64(event.get("user_id")),
        }
    }

    pub fn target(&self) -> MessageType {
        MessageType::resolve(&self.message_type, self.group_id)
    }
}

/// Reads an integer the forgiving way clients expect: numbers, numeric
/// strings and booleans are accepted, anything else is 0.
pub fn lenient_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|v| v as i64))
            .or_else(|| n.as_f64().map(|v| v as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}

pub fn lenient_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim(), "true" | "1"),
        _ => false,
    }
}

pub fn lenient_str(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(name: &str) -> jsonschema::Validator {
        let body = schema_body(name).unwrap_or_else(|| panic!("missing schema {name}"));
        let schema: Value = serde_json::from_str(body).unwrap();
        jsonschema::validator_for(&schema)
            .unwrap_or_else(|err| panic!("invalid schema {name}: {err}"))
    }

    #[test]
    fn embedded_schemas_compile() {
        let names: Vec<_> = schema_names().collect();
        assert_eq!(
            names,
            [
                "action_request.schema.json",
                "action_response.schema.json",
                "message_segment.schema.json",
                "quick_reply.schema.json",
            ]
        );
        for name in names {
            let _ = validator(name);
        }
    }

    #[test]
    fn response_envelopes_match_schema() {
        let schema = validator("action_response.schema.json");
        let ok = serde_json::to_value(ActionResponse::ok(json!({"online": true}))).unwrap();
        let failed = serde_json::to_value(
            ActionResponse::failure("no such api").with_echo(Some(json!("abc"))),
        )
        .unwrap();
        assert!(schema.is_valid(&ok));
        assert!(schema.is_valid(&failed));

        let mixed = json!({"status": "ok", "retcode": 100, "data": null, "echo": null});
        assert!(!schema.is_valid(&mixed));
    }

    #[test]
    fn absent_echo_serializes_as_null() {
        let req: ActionRequest = serde_json::from_str(r#"{"action":"get_status"}"#).unwrap();
        let res = ActionResponse::ok(json!({})).with_echo(req.echo);
        let encoded = serde_json::to_value(res).unwrap();
        assert_eq!(encoded["echo"], Value::Null);
        assert_eq!(encoded["retcode"], json!(0));
        assert_eq!(encoded["status"], json!("ok"));
    }

    #[test]
    fn segment_data_accepts_scalars() {
        let seg: MessageSegment =
            serde_json::from_value(json!({"type": "at", "data": {"qq": 12345}})).unwrap();
        assert_eq!(seg.get("qq"), "12345");

        let bare: MessageSegment = serde_json::from_value(json!({"type": "dice"})).unwrap();
        assert!(bare.data.is_empty());
        assert!(validator("message_segment.schema.json")
            .is_valid(&serde_json::to_value(&seg).unwrap()));
    }

    #[test]
    fn message_input_accepts_all_shapes() {
        let text: MessageInput = serde_json::from_value(json!("[CQ:face,id=1]")).unwrap();
        assert!(matches!(text, MessageInput::Text(_)));

        let one: MessageInput =
            serde_json::from_value(json!({"type": "text", "data": {"text": "hi"}})).unwrap();
        assert_eq!(one, MessageInput::Segment(MessageSegment::text("hi")));

        let many: MessageInput =
            serde_json::from_value(json!([{"type": "text", "data": {"text": "hi"}}])).unwrap();
        assert_eq!(many, MessageInput::Segments(vec![MessageSegment::text("hi")]));
    }

    #[test]
    fn message_type_resolution() {
        assert_eq!(MessageType::resolve("group", 0), MessageType::Group);
        assert_eq!(MessageType::resolve("private", 7), MessageType::Private);
        assert_eq!(MessageType::resolve("", 7), MessageType::Group);
        assert_eq!(MessageType::resolve("discuss", 0), MessageType::Private);
    }

    #[test]
    fn event_context_reads_numeric_strings() {
        let ctx = EventContext::from_event(&json!({
            "message_type": "group",
            "group_id": "42",
            "user_id": 7
        }));
        assert_eq!(ctx.group_id, 42);
        assert_eq!(ctx.user_id, 7);
        assert_eq!(ctx.target(), MessageType::Group);
    }

    #[test]
    fn quick_reply_schema_accepts_string_reply() {
        let body = json!({"reply": "pong", "at_sender": true});
        assert!(validator("quick_reply.schema.json").is_valid(&body));
        let reply: QuickReply = serde_json::from_value(body).unwrap();
        assert!(reply.at_sender);
        assert_eq!(reply.reply, Some(MessageInput::Text("pong".to_string())));
    }
}
