//! Protocol action handlers and the table they are registered from.
//!
//! Handlers validate identifiers before touching the engine, so an
//! `InvalidParameter` failure never leaves a partial side effect behind.

use cqbridge_contracts::{
    lenient_bool, lenient_i64, lenient_str, MessageInput, MessageType, APP_NAME, PROTOCOL_VERSION,
};
use serde_json::{json, Value};

use crate::dispatch::BotContext;
use crate::engine::{GroupRequest, PsKeyDomain, Target};
use crate::error::ActionError;
use crate::registry::Handler;
use crate::send::send_message;

const UNSUPPORTED: &str = "not supported by the engine";
const DEFAULT_BAN_SECONDS: i64 = 30 * 60;
const SEXES: [&str; 3] = ["unknown", "male", "female"];

#[rustfmt::skip]
pub const ACTIONS: &[(&str, Handler)] = &[
    ("send_msg", send_msg),
    ("send_private_msg", send_private_msg),
    ("send_group_msg", send_group_msg),
    ("delete_msg", delete_msg),
    ("get_msg", get_msg),
    ("get_forward_msg", unsupported),
    ("send_like", send_like),
    ("set_group_kick", set_group_kick),
    ("set_group_ban", set_group_ban),
    ("set_group_anonymous_ban", unsupported),
    ("set_group_whole_ban", set_group_whole_ban),
    ("set_group_admin", unsupported),
    ("set_group_anonymous", set_group_anonymous),
    ("set_group_card", set_group_card),
    ("set_group_name", unsupported),
    ("set_group_leave", set_group_leave),
    ("set_group_special_title", unsupported),
    ("set_friend_add_request", set_friend_add_request),
    ("set_group_add_request", set_group_add_request),
    ("get_login_info", get_login_info),
    ("get_stranger_info", get_stranger_info),
    ("get_friend_list", get_friend_list),
    ("get_group_info", get_group_info),
    ("get_group_list", get_group_list),
    ("get_group_member_info", get_group_member_info),
    ("get_group_member_list", get_group_member_list),
    ("get_group_honor_info", unsupported),
    ("get_cookies", get_cookies),
    ("get_credentials", get_cookies),
    ("get_csrf_token", unsupported),
    ("get_record", unsupported),
    ("get_image", unsupported),
    ("can_send_image", can_send),
    ("can_send_record", can_send),
    ("get_status", get_status),
    ("get_version_info", get_version_info),
    ("set_restart", unsupported),
    ("clean_cache", unsupported),
    ("out_put_log", out_put_log),
    ("send_xml", send_xml),
    ("send_json", send_json),
];

fn int(params: &Value, key: &str) -> i64 {
    lenient_i64(params.get(key))
}

fn text(params: &Value, key: &str) -> String {
    lenient_str(params.get(key))
}

/// Boolean parameter, `default` when absent or null.
fn flag_or(params: &Value, key: &str, default: bool) -> bool {
    match params.get(key) {
        None | Some(Value::Null) => default,
        value => lenient_bool(value),
    }
}

fn require(params: &Value, key: &'static str) -> Result<i64, ActionError> {
    match int(params, key) {
        0 => Err(ActionError::InvalidParameter(key)),
        value => Ok(value),
    }
}

fn message(params: &Value) -> MessageInput {
    match params.get("message") {
        None | Some(Value::Null) => MessageInput::Text(String::new()),
        Some(value) => serde_json::from_value(value.clone())
            .unwrap_or_else(|_| MessageInput::Text(lenient_str(Some(value)))),
    }
}

fn parse_engine_json(raw: &str, what: &str) -> Result<Value, ActionError> {
    serde_json::from_str(raw)
        .map_err(|err| ActionError::Internal(format!("malformed {what} from engine: {err}")))
}

fn sex(code: i64) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|i| SEXES.get(i))
        .copied()
        .unwrap_or("unknown")
}

fn unsupported(_: &BotContext<'_>, _: &Value) -> Result<Value, ActionError> {
    Err(ActionError::UnsupportedByHost(UNSUPPORTED))
}

fn send_msg(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let target = Target::resolve(
        &text(params, "message_type"),
        int(params, "group_id"),
        int(params, "user_id"),
    );
    let target = match target.message_type {
        MessageType::Group => Target::group(require(params, "group_id")?),
        MessageType::Private => Target::private(require(params, "user_id")?),
    };
    send_message(ctx, &target, message(params), "")
}

fn send_private_msg(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let target = Target::private(require(params, "user_id")?);
    send_message(ctx, &target, message(params), "")
}

fn send_group_msg(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let target = Target::group(require(params, "group_id")?);
    send_message(ctx, &target, message(params), "")
}

fn delete_msg(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let id = require(params, "message_id")?;
    let stored = ctx
        .history
        .find(ctx.bot_id, id)?
        .ok_or_else(|| ActionError::Failed("no such message".to_string()))?;
    ctx.engine.withdraw_msg(ctx.bot_id, &stored)?;
    Ok(Value::Null)
}

fn get_msg(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let id = require(params, "message_id")?;
    let stored = ctx
        .history
        .find(ctx.bot_id, id)?
        .ok_or_else(|| ActionError::Failed("no such message".to_string()))?;
    Ok(json!({
        "time": stored.time,
        "message_type": stored.message_type.as_str(),
        "message_id": stored.message_id,
        "real_id": stored.engine_ref,
        "sender": {
            "user_id": ctx.bot_id,
            "nickname": "unknown",
            "sex": "unknown",
            "age": 0,
            "area": "",
            "card": "",
            "level": "",
            "role": "unknown",
            "title": "unknown",
        },
        "message": ctx.codec.engine_to_standard(&stored.text),
    }))
}

fn send_like(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let user_id = require(params, "user_id")?;
    ctx.engine.up_vote(ctx.bot_id, user_id)?;
    Ok(Value::Null)
}

fn set_group_kick(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let group_id = require(params, "group_id")?;
    let user_id = require(params, "user_id")?;
    let reject = flag_or(params, "reject_add_request", false);
    ctx.engine
        .kick_group_member(ctx.bot_id, group_id, user_id, reject)?;
    Ok(Value::Null)
}

fn set_group_ban(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let group_id = require(params, "group_id")?;
    let user_id = require(params, "user_id")?;
    let duration = match params.get("duration") {
        None | Some(Value::Null) => DEFAULT_BAN_SECONDS,
        value => lenient_i64(value),
    };
    ctx.engine.mute(ctx.bot_id, group_id, user_id, duration)?;
    Ok(Value::Null)
}

fn set_group_whole_ban(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let group_id = require(params, "group_id")?;
    let duration = i64::from(flag_or(params, "enable", true));
    ctx.engine.mute(ctx.bot_id, group_id, 0, duration)?;
    Ok(Value::Null)
}

fn set_group_anonymous(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let group_id = require(params, "group_id")?;
    let enable = flag_or(params, "enable", true);
    ctx.engine.set_anonymous(ctx.bot_id, group_id, enable)?;
    Ok(Value::Null)
}

fn set_group_card(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let group_id = require(params, "group_id")?;
    let user_id = require(params, "user_id")?;
    let card = text(params, "card");
    ctx.engine
        .set_group_card(ctx.bot_id, group_id, user_id, &card)?;
    Ok(Value::Null)
}

fn set_group_leave(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let group_id = require(params, "group_id")?;
    ctx.engine.quit_group(ctx.bot_id, group_id)?;
    Ok(Value::Null)
}

fn set_friend_add_request(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let flag = require(params, "flag")?;
    let approve = flag_or(params, "approve", true);
    let remark = text(params, "remark");
    ctx.engine
        .handle_friend_request(ctx.bot_id, flag, approve, &remark)?;
    Ok(Value::Null)
}

/// The flag is `sub_type|group_id|seq`, as carried by request events.
fn set_group_add_request(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let flag = text(params, "flag");
    let parts: Vec<i64> = flag
        .split('|')
        .map(|part| part.trim().parse::<i64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ActionError::InvalidParameter("flag"))?;
    let [sub_type, group_id, seq, ..] = parts[..] else {
        return Err(ActionError::InvalidParameter("flag"));
    };
    let request = GroupRequest {
        sub_type,
        user_id: int(params, "user_id"),
        group_id,
        seq,
        approve: flag_or(params, "approve", true),
        reason: text(params, "reason"),
    };
    ctx.engine.handle_group_request(ctx.bot_id, &request)?;
    Ok(Value::Null)
}

fn get_login_info(ctx: &BotContext<'_>, _: &Value) -> Result<Value, ActionError> {
    let nickname = ctx.engine.nickname(ctx.bot_id, ctx.bot_id)?;
    let nickname = nickname.lines().next().unwrap_or_default();
    Ok(json!({ "user_id": ctx.bot_id, "nickname": nickname }))
}

fn get_stranger_info(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let user_id = require(params, "user_id")?;
    Ok(json!({
        "user_id": user_id,
        "nickname": ctx.engine.nickname(ctx.bot_id, user_id)?,
        "sex": sex(ctx.engine.gender(ctx.bot_id, user_id)?),
        "age": ctx.engine.age(ctx.bot_id, user_id)?,
    }))
}

fn get_friend_list(ctx: &BotContext<'_>, _: &Value) -> Result<Value, ActionError> {
    let raw = ctx.engine.friend_list(ctx.bot_id)?;
    if raw.is_empty() {
        return Err(ActionError::Failed("friend list unavailable".to_string()));
    }
    let list = parse_engine_json(&raw, "friend list")?;
    let friends: Vec<Value> = list
        .pointer("/result/0/mems")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|friend| {
            json!({
                "user_id": lenient_i64(friend.get("uin")),
                "nickname": lenient_str(friend.get("name")),
                "remark": "unknown",
            })
        })
        .collect();
    Ok(Value::Array(friends))
}

fn get_group_info(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let group_id = require(params, "group_id")?;
    let name = ctx.engine.group_name(ctx.bot_id, group_id)?;
    let counts = ctx.engine.group_member_count(ctx.bot_id, group_id)?;
    let (count, max) = match counts.split('\n').collect::<Vec<_>>()[..] {
        [count, max] => (
            count.trim().parse().unwrap_or(-1),
            max.trim().parse().unwrap_or(-1),
        ),
        _ => (-1_i64, -1_i64),
    };
    Ok(json!({
        "group_id": group_id,
        "group_name": name,
        "member_count": count,
        "max_member_count": max,
    }))
}

fn get_group_list(ctx: &BotContext<'_>, _: &Value) -> Result<Value, ActionError> {
    let raw = ctx.engine.group_list(ctx.bot_id)?;
    if raw.is_empty() {
        return Err(ActionError::Failed("group list unavailable".to_string()));
    }
    let list = parse_engine_json(&raw, "group list")?;
    let groups: Vec<Value> = ["create", "manage", "join"]
        .iter()
        .filter_map(|section| list.get(*section).and_then(Value::as_array))
        .flatten()
        .map(|group| {
            json!({
                "group_id": lenient_i64(group.get("gc")),
                "group_name": lenient_str(group.get("gn")),
                "member_count": 0,
                "max_member_count": 0,
            })
        })
        .collect();
    Ok(Value::Array(groups))
}

fn get_group_member_info(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let group_id = require(params, "group_id")?;
    let user_id = require(params, "user_id")?;
    let nickname = ctx.engine.nickname(ctx.bot_id, user_id)?;
    Ok(json!({
        "group_id": group_id,
        "user_id": user_id,
        "nickname": nickname,
        "card": nickname,
        "sex": sex(ctx.engine.gender(ctx.bot_id, user_id)?),
        "age": ctx.engine.age(ctx.bot_id, user_id)?,
        "area": "unknown",
        "join_time": 0,
        "last_sent_time": 0,
        "level": "unknown",
        "role": "unknown",
        "unfriendly": false,
        "title": "unknown",
        "title_expire_time": 0,
        "card_changeable": true,
    }))
}

fn get_group_member_list(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let group_id = require(params, "group_id")?;
    let raw = ctx.engine.group_member_list(ctx.bot_id, group_id)?;
    if raw.is_empty() {
        return Err(ActionError::Failed("member list unavailable".to_string()));
    }
    let list = parse_engine_json(&raw, "member list")?;
    let members: Vec<Value> = list
        .get("list")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|member| {
            json!({
                "group_id": group_id,
                "user_id": lenient_i64(member.get("QQ")),
                "nickname": "unknown",
                "card": "unknown",
                "sex": "unknown",
                "age": 0,
                "area": "unknown",
                "join_time": 0,
                "last_sent_time": 0,
                "level": lenient_i64(member.get("lv")),
                "role": "unknown",
                "unfriendly": false,
                "title": "unknown",
                "title_expire_time": 0,
                "card_changeable": true,
            })
        })
        .collect();
    Ok(Value::Array(members))
}

fn get_cookies(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let mut cookies = ctx.engine.cookies(ctx.bot_id)?;
    let domain = match text(params, "domain").as_str() {
        "qun.qq.com" => Some(PsKeyDomain::Group),
        "qzone.qq.com" => Some(PsKeyDomain::Zone),
        _ => None,
    };
    if let Some(domain) = domain {
        cookies.push_str(&ctx.engine.ps_key(ctx.bot_id, domain)?);
    }
    Ok(json!({ "cookies": cookies }))
}

fn can_send(_: &BotContext<'_>, _: &Value) -> Result<Value, ActionError> {
    Ok(json!({ "yes": true }))
}

fn get_status(ctx: &BotContext<'_>, _: &Value) -> Result<Value, ActionError> {
    let online = ctx.engine.is_online(ctx.bot_id, ctx.bot_id)?;
    Ok(json!({ "online": online, "good": true }))
}

fn get_version_info(_: &BotContext<'_>, _: &Value) -> Result<Value, ActionError> {
    Ok(json!({
        "app_name": APP_NAME,
        "app_version": env!("CARGO_PKG_VERSION"),
        "protocol_version": PROTOCOL_VERSION,
    }))
}

fn out_put_log(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    ctx.engine.output_log(&text(params, "text"))?;
    Ok(json!({}))
}

/// Target for a raw card: needs at least one of group or user.
fn card_target(params: &Value) -> Result<Target, ActionError> {
    let group_id = int(params, "group_id");
    let user_id = int(params, "user_id");
    if group_id == 0 && user_id == 0 {
        return Err(ActionError::InvalidParameter("group_id"));
    }
    Ok(Target::resolve(
        &text(params, "message_type"),
        group_id,
        user_id,
    ))
}

fn send_xml(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let target = card_target(params)?;
    ctx.engine
        .send_xml(ctx.bot_id, &target, &text(params, "data"))?;
    Ok(json!({}))
}

fn send_json(ctx: &BotContext<'_>, params: &Value) -> Result<Value, ActionError> {
    let target = card_target(params)?;
    ctx.engine
        .send_json(ctx.bot_id, &target, &text(params, "data"))?;
    Ok(json!({}))
}
