//! Test doubles shared by this crate's tests and the server's integration
//! tests (`test-support` feature).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::dispatch::{BotContext, Dispatcher};
use crate::engine::{Engine, GroupRequest, PsKeyDomain, Target};
use crate::error::EngineError;
use crate::history::{MemoryMessageLog, StoredMessage};
use crate::media::MediaStore;
use crate::registry::{ActionRegistry, Lookup};
use crate::segment::SegmentCodec;

pub const TEST_BOT_ID: i64 = 10001;

/// Engine that answers from its fields and records every call as a line of
/// text.
#[derive(Default)]
pub struct RecordingEngine {
    pub online: bool,
    pub nickname: String,
    pub gender: i64,
    pub age: i64,
    pub friend_list: String,
    pub group_list: String,
    pub group_member_list: String,
    pub group_name: String,
    pub group_member_count: String,
    pub cookies: String,
    pub ps_key: String,
    pub calls: Mutex<Vec<String>>,
    pub sends: AtomicI64,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Engine for RecordingEngine {
    fn send_msg(&self, bot: i64, target: &Target, text: &str) -> Result<String, EngineError> {
        self.push(format!(
            "send_msg {bot} {} {} {} {text}",
            target.message_type.as_str(),
            target.group_id,
            target.user_id
        ));
        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("ref-{n}"))
    }

    fn withdraw_msg(&self, bot: i64, message: &StoredMessage) -> Result<(), EngineError> {
        self.push(format!("withdraw_msg {bot} {}", message.engine_ref));
        Ok(())
    }

    fn shake_window(&self, bot: i64, user_id: i64) -> Result<(), EngineError> {
        self.push(format!("shake_window {bot} {user_id}"));
        Ok(())
    }

    fn send_xml(&self, bot: i64, target: &Target, xml: &str) -> Result<(), EngineError> {
        self.push(format!(
            "send_xml {bot} {} {} {} {xml}",
            target.message_type.as_str(),
            target.group_id,
            target.user_id
        ));
        Ok(())
    }

    fn send_json(&self, bot: i64, target: &Target, json: &str) -> Result<(), EngineError> {
        self.push(format!(
            "send_json {bot} {} {} {} {json}",
            target.message_type.as_str(),
            target.group_id,
            target.user_id
        ));
        Ok(())
    }

    fn up_vote(&self, bot: i64, user_id: i64) -> Result<(), EngineError> {
        self.push(format!("up_vote {bot} {user_id}"));
        Ok(())
    }

    fn kick_group_member(
        &self,
        bot: i64,
        group_id: i64,
        user_id: i64,
        reject_add_request: bool,
    ) -> Result<(), EngineError> {
        self.push(format!(
            "kick_group_member {bot} {group_id} {user_id} {reject_add_request}"
        ));
        Ok(())
    }

    fn mute(&self, bot: i64, group_id: i64, user_id: i64, duration: i64) -> Result<(), EngineError> {
        self.push(format!("mute {bot} {group_id} {user_id} {duration}"));
        Ok(())
    }

    fn set_anonymous(&self, bot: i64, group_id: i64, enable: bool) -> Result<(), EngineError> {
        self.push(format!("set_anonymous {bot} {group_id} {enable}"));
        Ok(())
    }

    fn set_group_card(
        &self,
        bot: i64,
        group_id: i64,
        user_id: i64,
        card: &str,
    ) -> Result<(), EngineError> {
        self.push(format!("set_group_card {bot} {group_id} {user_id} {card}"));
        Ok(())
    }

    fn quit_group(&self, bot: i64, group_id: i64) -> Result<(), EngineError> {
        self.push(format!("quit_group {bot} {group_id}"));
        Ok(())
    }

    fn handle_friend_request(
        &self,
        bot: i64,
        flag: i64,
        approve: bool,
        remark: &str,
    ) -> Result<(), EngineError> {
        self.push(format!("handle_friend_request {bot} {flag} {approve} {remark}"));
        Ok(())
    }

    fn handle_group_request(&self, bot: i64, request: &GroupRequest) -> Result<(), EngineError> {
        self.push(format!(
            "handle_group_request {bot} {} {} {} {} {} {}",
            request.sub_type,
            request.user_id,
            request.group_id,
            request.seq,
            request.approve,
            request.reason
        ));
        Ok(())
    }

    fn nickname(&self, _: i64, _: i64) -> Result<String, EngineError> {
        Ok(self.nickname.clone())
    }

    fn gender(&self, _: i64, _: i64) -> Result<i64, EngineError> {
        Ok(self.gender)
    }

    fn age(&self, _: i64, _: i64) -> Result<i64, EngineError> {
        Ok(self.age)
    }

    fn friend_list(&self, _: i64) -> Result<String, EngineError> {
        Ok(self.friend_list.clone())
    }

    fn group_list(&self, _: i64) -> Result<String, EngineError> {
        Ok(self.group_list.clone())
    }

    fn group_member_list(&self, _: i64, _: i64) -> Result<String, EngineError> {
        Ok(self.group_member_list.clone())
    }

    fn group_name(&self, _: i64, _: i64) -> Result<String, EngineError> {
        Ok(self.group_name.clone())
    }

    fn group_member_count(&self, _: i64, _: i64) -> Result<String, EngineError> {
        Ok(self.group_member_count.clone())
    }

    fn cookies(&self, _: i64) -> Result<String, EngineError> {
        Ok(self.cookies.clone())
    }

    fn ps_key(&self, _: i64, _: PsKeyDomain) -> Result<String, EngineError> {
        Ok(self.ps_key.clone())
    }

    fn is_online(&self, _: i64, _: i64) -> Result<bool, EngineError> {
        Ok(self.online)
    }

    fn output_log(&self, text: &str) -> Result<(), EngineError> {
        self.push(format!("output_log {text}"));
        Ok(())
    }
}

/// Media directories under a fresh temp root.
pub fn temp_media(tag: &str) -> MediaStore {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let root = std::env::temp_dir().join(format!("cqbridge-{tag}-{nanos}"));
    MediaStore::new(root.join("image"), root.join("record"), root.join("video"))
}

/// One bot's collaborators, wired the way the server wires them.
pub struct Fixture {
    pub engine: Arc<RecordingEngine>,
    pub history: Arc<MemoryMessageLog>,
    pub media: MediaStore,
    pub codec: SegmentCodec,
}

impl Fixture {
    pub fn new(tag: &str) -> Self {
        Self::with_engine(tag, RecordingEngine::default())
    }

    pub fn with_engine(tag: &str, engine: RecordingEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            history: Arc::new(MemoryMessageLog::default()),
            media: temp_media(tag),
            codec: SegmentCodec::new().expect("tag grammars compile"),
        }
    }

    pub fn context(&self) -> BotContext<'_> {
        BotContext {
            bot_id: TEST_BOT_ID,
            engine: self.engine.as_ref(),
            history: self.history.as_ref(),
            media: &self.media,
            codec: &self.codec,
        }
    }

    pub fn dispatcher(&self, lookup: Lookup) -> Dispatcher {
        self.dispatcher_with(ActionRegistry::build(), lookup)
    }

    pub fn dispatcher_with(&self, registry: ActionRegistry, lookup: Lookup) -> Dispatcher {
        Dispatcher::new(
            Arc::new(registry),
            lookup,
            self.engine.clone(),
            self.history.clone(),
            self.media.clone(),
            SegmentCodec::new().expect("tag grammars compile"),
        )
    }
}
