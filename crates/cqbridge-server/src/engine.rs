//! [`Engine`] over a JSON-RPC-style HTTP endpoint exposed by the host.
//!
//! Each call is `POST {"bot", "method", "args"}`; the host answers
//! `{"result": ...}` or `{"error": "..."}`. Methods without a value answer
//! `{"result": null}`.

use std::time::Duration;

use cqbridge_kernel::{Engine, EngineError, GroupRequest, PsKeyDomain, StoredMessage, Target};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

pub struct HttpEngine {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct EngineCall<'a> {
    bot: i64,
    method: &'a str,
    args: Value,
}

#[derive(Deserialize)]
struct EngineReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl HttpEngine {
    /// Builds the blocking client. Must not be called from inside an async
    /// task; use `spawn_blocking`.
    pub fn new(endpoint: &str, timeout_ms: u64) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }

    fn call<T: DeserializeOwned>(&self, bot: i64, method: &str, args: Value) -> Result<T, EngineError> {
        debug!(bot_id = bot, method, "engine call");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EngineCall { bot, method, args })
            .send()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Rejected(format!(
                "{method}: http {}",
                response.status()
            )));
        }
        let reply: EngineReply = response
            .json()
            .map_err(|e| EngineError::Malformed(format!("{method}: {e}")))?;
        if let Some(error) = reply.error {
            return Err(EngineError::Rejected(format!("{method}: {error}")));
        }
        serde_json::from_value(reply.result)
            .map_err(|e| EngineError::Malformed(format!("{method}: {e}")))
    }
}

fn target_args(target: &Target) -> Value {
    json!({
        "message_type": target.message_type.engine_code(),
        "group_id": target.group_id,
        "user_id": target.user_id,
    })
}

fn with_target(target: &Target, key: &str, value: &str) -> Value {
    let mut args = target_args(target);
    args[key] = Value::String(value.to_string());
    args
}

impl Engine for HttpEngine {
    fn send_msg(&self, bot: i64, target: &Target, text: &str) -> Result<String, EngineError> {
        let reference: Value = self.call(bot, "send_msg", with_target(target, "text", text))?;
        Ok(match reference {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    fn withdraw_msg(&self, bot: i64, message: &StoredMessage) -> Result<(), EngineError> {
        self.call(
            bot,
            "withdraw_msg",
            json!({
                "message_type": message.message_type.engine_code(),
                "group_id": message.group_id,
                "user_id": message.user_id,
                "engine_ref": message.engine_ref,
                "time": message.time,
            }),
        )
    }

    fn shake_window(&self, bot: i64, user_id: i64) -> Result<(), EngineError> {
        self.call(bot, "shake_window", json!({ "user_id": user_id }))
    }

    fn send_xml(&self, bot: i64, target: &Target, xml: &str) -> Result<(), EngineError> {
        self.call(bot, "send_xml", with_target(target, "xml", xml))
    }

    fn send_json(&self, bot: i64, target: &Target, json: &str) -> Result<(), EngineError> {
        self.call(bot, "send_json", with_target(target, "json", json))
    }

    fn up_vote(&self, bot: i64, user_id: i64) -> Result<(), EngineError> {
        self.call(bot, "up_vote", json!({ "user_id": user_id }))
    }

    fn kick_group_member(
        &self,
        bot: i64,
        group_id: i64,
        user_id: i64,
        reject_add_request: bool,
    ) -> Result<(), EngineError> {
        self.call(
            bot,
            "kick_group_member",
            json!({
                "group_id": group_id,
                "user_id": user_id,
                "reject_add_request": reject_add_request,
            }),
        )
    }

    fn mute(&self, bot: i64, group_id: i64, user_id: i64, duration: i64) -> Result<(), EngineError> {
        self.call(
            bot,
            "mute",
            json!({ "group_id": group_id, "user_id": user_id, "duration": duration }),
        )
    }

    fn set_anonymous(&self, bot: i64, group_id: i64, enable: bool) -> Result<(), EngineError> {
        self.call(
            bot,
            "set_anonymous",
            json!({ "group_id": group_id, "enable": enable }),
        )
    }

    fn set_group_card(
        &self,
        bot: i64,
        group_id: i64,
        user_id: i64,
        card: &str,
    ) -> Result<(), EngineError> {
        self.call(
            bot,
            "set_group_card",
            json!({ "group_id": group_id, "user_id": user_id, "card": card }),
        )
    }

    fn quit_group(&self, bot: i64, group_id: i64) -> Result<(), EngineError> {
        self.call(bot, "quit_group", json!({ "group_id": group_id }))
    }

    fn handle_friend_request(
        &self,
        bot: i64,
        flag: i64,
        approve: bool,
        remark: &str,
    ) -> Result<(), EngineError> {
        self.call(
            bot,
            "handle_friend_request",
            json!({ "flag": flag, "approve": approve, "remark": remark }),
        )
    }

    fn handle_group_request(&self, bot: i64, request: &GroupRequest) -> Result<(), EngineError> {
        self.call(
            bot,
            "handle_group_request",
            json!({
                "sub_type": request.sub_type,
                "user_id": request.user_id,
                "group_id": request.group_id,
                "seq": request.seq,
                "approve": request.approve,
                "reason": request.reason,
            }),
        )
    }

    fn nickname(&self, bot: i64, user_id: i64) -> Result<String, EngineError> {
        self.call(bot, "nickname", json!({ "user_id": user_id }))
    }

    fn gender(&self, bot: i64, user_id: i64) -> Result<i64, EngineError> {
        self.call(bot, "gender", json!({ "user_id": user_id }))
    }

    fn age(&self, bot: i64, user_id: i64) -> Result<i64, EngineError> {
        self.call(bot, "age", json!({ "user_id": user_id }))
    }

    fn friend_list(&self, bot: i64) -> Result<String, EngineError> {
        self.call(bot, "friend_list", json!({}))
    }

    fn group_list(&self, bot: i64) -> Result<String, EngineError> {
        self.call(bot, "group_list", json!({}))
    }

    fn group_member_list(&self, bot: i64, group_id: i64) -> Result<String, EngineError> {
        self.call(bot, "group_member_list", json!({ "group_id": group_id }))
    }

    fn group_name(&self, bot: i64, group_id: i64) -> Result<String, EngineError> {
        self.call(bot, "group_name", json!({ "group_id": group_id }))
    }

    fn group_member_count(&self, bot: i64, group_id: i64) -> Result<String, EngineError> {
        self.call(bot, "group_member_count", json!({ "group_id": group_id }))
    }

    fn cookies(&self, bot: i64) -> Result<String, EngineError> {
        self.call(bot, "cookies", json!({}))
    }

    fn ps_key(&self, bot: i64, domain: PsKeyDomain) -> Result<String, EngineError> {
        let domain = match domain {
            PsKeyDomain::Group => "group",
            PsKeyDomain::Zone => "zone",
        };
        self.call(bot, "ps_key", json!({ "domain": domain }))
    }

    fn is_online(&self, bot: i64, user_id: i64) -> Result<bool, EngineError> {
        self.call(bot, "is_online", json!({ "user_id": user_id }))
    }

    fn output_log(&self, text: &str) -> Result<(), EngineError> {
        self.call(0, "output_log", json!({ "text": text }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqbridge_kernel::Target;

    #[test]
    fn target_args_use_engine_codes() {
        let args = with_target(&Target::group(5), "text", "hi");
        assert_eq!(
            args,
            json!({"message_type": 2, "group_id": 5, "user_id": 0, "text": "hi"})
        );
        assert_eq!(target_args(&Target::private(9))["message_type"], json!(1));
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_error() {
        let engine = HttpEngine::new("http://127.0.0.1:9/rpc", 200).unwrap();
        let err = engine.is_online(1, 1).unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)), "{err}");
    }
}
