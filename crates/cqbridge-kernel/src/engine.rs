//! The chat engine the bridge drives.
//!
//! Every operation is a synchronous call into the host. Success or failure of
//! the call itself is the host's concern; the bridge only maps the outcome
//! into an envelope.

use cqbridge_contracts::MessageType;

use crate::error::EngineError;
use crate::history::StoredMessage;

/// Where a message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub message_type: MessageType,
    pub group_id: i64,
    pub user_id: i64,
}

impl Target {
    pub fn group(group_id: i64) -> Self {
        Self {
            message_type: MessageType::Group,
            group_id,
            user_id: 0,
        }
    }

    pub fn private(user_id: i64) -> Self {
        Self {
            message_type: MessageType::Private,
            group_id: 0,
            user_id,
        }
    }

    pub fn resolve(message_type: &str, group_id: i64, user_id: i64) -> Self {
        Self {
            message_type: MessageType::resolve(message_type, group_id),
            group_id,
            user_id,
        }
    }
}

/// A pending join request, decoded from the `sub_type|group|seq` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRequest {
    pub sub_type: i64,
    pub user_id: i64,
    pub group_id: i64,
    pub seq: i64,
    pub approve: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsKeyDomain {
    Group,
    Zone,
}

pub trait Engine: Send + Sync {
    /// Sends engine tag text and returns the engine's reference for it.
    fn send_msg(&self, bot: i64, target: &Target, text: &str) -> Result<String, EngineError>;
    fn withdraw_msg(&self, bot: i64, message: &StoredMessage) -> Result<(), EngineError>;
    fn shake_window(&self, bot: i64, user_id: i64) -> Result<(), EngineError>;
    fn send_xml(&self, bot: i64, target: &Target, xml: &str) -> Result<(), EngineError>;
    fn send_json(&self, bot: i64, target: &Target, json: &str) -> Result<(), EngineError>;

    fn up_vote(&self, bot: i64, user_id: i64) -> Result<(), EngineError>;
    fn kick_group_member(
        &self,
        bot: i64,
        group_id: i64,
        user_id: i64,
        reject_add_request: bool,
    ) -> Result<(), EngineError>;
    /// `user_id == 0` addresses the whole group; `duration` is seconds.
    fn mute(&self, bot: i64, group_id: i64, user_id: i64, duration: i64)
        -> Result<(), EngineError>;
    fn set_anonymous(&self, bot: i64, group_id: i64, enable: bool) -> Result<(), EngineError>;
    fn set_group_card(
        &self,
        bot: i64,
        group_id: i64,
        user_id: i64,
        card: &str,
    ) -> Result<(), EngineError>;
    fn quit_group(&self, bot: i64, group_id: i64) -> Result<(), EngineError>;
    fn handle_friend_request(
        &self,
        bot: i64,
        flag: i64,
        approve: bool,
        remark: &str,
    ) -> Result<(), EngineError>;
    fn handle_group_request(&self, bot: i64, request: &GroupRequest) -> Result<(), EngineError>;

    fn nickname(&self, bot: i64, user_id: i64) -> Result<String, EngineError>;
    /// 0 unknown, 1 male, 2 female.
    fn gender(&self, bot: i64, user_id: i64) -> Result<i64, EngineError>;
    fn age(&self, bot: i64, user_id: i64) -> Result<i64, EngineError>;
    /// Raw JSON text as produced by the host; empty on failure.
    fn friend_list(&self, bot: i64) -> Result<String, EngineError>;
    fn group_list(&self, bot: i64) -> Result<String, EngineError>;
    fn group_member_list(&self, bot: i64, group_id: i64) -> Result<String, EngineError>;
    fn group_name(&self, bot: i64, group_id: i64) -> Result<String, EngineError>;
    /// `"<count>\n<max>"`.
    fn group_member_count(&self, bot: i64, group_id: i64) -> Result<String, EngineError>;
    fn cookies(&self, bot: i64) -> Result<String, EngineError>;
    fn ps_key(&self, bot: i64, domain: PsKeyDomain) -> Result<String, EngineError>;
    fn is_online(&self, bot: i64, user_id: i64) -> Result<bool, EngineError>;
    fn output_log(&self, text: &str) -> Result<(), EngineError>;
}
