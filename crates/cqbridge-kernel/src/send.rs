//! Rendering segments into engine tag text and sending them.

use chrono::Utc;
use cqbridge_contracts::{MessageInput, MessageSegment};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::dispatch::BotContext;
use crate::engine::Target;
use crate::error::ActionError;
use crate::history::NewMessage;
use crate::media::MediaKind;

const NO_SUCH_ELEMENT: &str = "[no such element]";

/// Renders `segments` in order. Segments the engine only accepts as separate
/// calls (shake, xml, json, custom music) are sent immediately and contribute
/// no text.
pub fn segments_to_engine_text(
    ctx: &BotContext<'_>,
    target: &Target,
    segments: &[MessageSegment],
) -> Result<String, ActionError> {
    let mut out = String::new();
    for segment in segments {
        match segment.kind.as_str() {
            "text" => out.push_str(segment.get("text")),
            "face" => out.push_str(&format!("[Face{}.gif]", segment.get("id"))),
            "image" => {
                let file = media_ref(ctx, MediaKind::Image, segment.get("file"));
                out.push_str(&format!("[pic={file}]"));
            }
            "record" => {
                let file = media_ref(ctx, MediaKind::Record, segment.get("file"));
                out.push_str(&format!("[Voi={file}]"));
            }
            "video" => {
                let file = media_ref(ctx, MediaKind::Video, segment.get("file"));
                out.push_str(&format!("[Voi={file}]"));
            }
            "at" => out.push_str(&format!("[@{}]", segment.get("qq"))),
            "emoji" => out.push_str(&format!("[emoji={}]", segment.get("id"))),
            "shake" => ctx.engine.shake_window(ctx.bot_id, target.user_id)?,
            "music" if segment.get("type") == "custom" => {
                let card = custom_music_card(segment);
                ctx.engine.send_xml(ctx.bot_id, target, &card)?;
            }
            "xml" => ctx.engine.send_xml(ctx.bot_id, target, segment.get("data"))?,
            "json" => ctx.engine.send_json(ctx.bot_id, target, segment.get("data"))?,
            "music" | "rps" | "dice" | "poke" | "anonymous" | "share" | "contact"
            | "location" | "reply" | "forward" | "node" => out.push_str(NO_SUCH_ELEMENT),
            "error" => {
                warn!(bot_id = ctx.bot_id, raw = segment.get("error"), "inline tag not decoded, sending as is");
                out.push_str(segment.get("error"));
            }
            other => {
                let raw = reencode(segment);
                warn!(bot_id = ctx.bot_id, kind = other, raw = %raw, "unknown segment type, sending as is");
                out.push_str(&raw);
            }
        }
    }
    Ok(out)
}

/// Normalizes `message`, renders it behind `prefix` and hands the text to
/// the engine. Returns `{"message_id": id}`, where id is 0 when there was no
/// text to send.
pub fn send_message(
    ctx: &BotContext<'_>,
    target: &Target,
    message: MessageInput,
    prefix: &str,
) -> Result<Value, ActionError> {
    let segments = ctx.codec.to_segments(message);
    let mut text = prefix.to_string();
    text.push_str(&segments_to_engine_text(ctx, target, &segments)?);
    if text.is_empty() {
        return Ok(json!({ "message_id": 0 }));
    }

    let engine_ref = ctx.engine.send_msg(ctx.bot_id, target, &text)?;
    // The engine already delivered it; a log failure only costs the id.
    let message_id = ctx
        .history
        .record(NewMessage {
            bot_id: ctx.bot_id,
            message_type: target.message_type,
            group_id: target.group_id,
            user_id: target.user_id,
            engine_ref,
            text,
            time: Utc::now().timestamp(),
        })
        .unwrap_or_else(|err| {
            warn!(bot_id = ctx.bot_id, error = %err, "sent message not recorded");
            0
        });
    debug!(
        bot_id = ctx.bot_id,
        message_type = target.message_type.as_str(),
        message_id,
        "message sent"
    );
    Ok(json!({ "message_id": message_id }))
}

fn media_ref(ctx: &BotContext<'_>, kind: MediaKind, file: &str) -> String {
    let file = file.replace("\\/", "/");
    if let Some(payload) = file.strip_prefix("base64://") {
        return match ctx.media.store_base64(kind, payload) {
            Ok(path) => path.display().to_string(),
            Err(err) => {
                warn!(bot_id = ctx.bot_id, ?kind, error = %err, "inline media not stored");
                "error".to_string()
            }
        };
    }
    if let Some(local) = file.strip_prefix("file:///") {
        return local.to_string();
    }
    if file.starts_with("http://") || file.starts_with("https://") {
        return file;
    }
    "error".to_string()
}

fn reencode(segment: &MessageSegment) -> String {
    let mut tag = format!("[CQ:{}", segment.kind);
    for (key, value) in &segment.data {
        tag.push_str(&format!(",{key}={value}"));
    }
    tag.push(']');
    tag
}

fn custom_music_card(segment: &MessageSegment) -> String {
    let title = xml_escape(segment.get("title"));
    let content = xml_escape(segment.get("content"));
    format!(
        concat!(
            "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>",
            "<msg serviceID=\"2\" templateID=\"1\" action=\"web\" brief=\"[分享] {title}\" ",
            "sourceMsgId=\"0\" url=\"{url}\" flag=\"0\" adverSign=\"0\" multiMsgFlag=\"0\">",
            "<item layout=\"2\"><audio cover=\"{image}\" src=\"{audio}\"/>",
            "<title>{title}</title><summary>{content}</summary></item>",
            "<source name=\"音乐\" icon=\"https://i.gtimg.cn/open/app_icon/01/07/98/56/1101079856_100_m.png\" ",
            "url=\"http://web.p.qq.com/qqmpmobile/aio/app.html?id=1101079856\" action=\"app\" ",
            "a_actionData=\"com.tencent.qqmusic\" i_actionData=\"tencent1101079856://\" ",
            "appid=\"1101079856\" /></msg>"
        ),
        title = title,
        url = segment.get("url"),
        image = segment.get("image"),
        audio = segment.get("audio"),
        content = content,
    )
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
    out
}
