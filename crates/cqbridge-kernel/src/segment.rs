//! `[CQ:...]` inline tags to message segments.
//!
//! A tag body is `type,k1=v1,k2=v2`. Parameters are positional: each type has
//! an ordered list of field layouts, longest first, and the first layout that
//! matches the whole residual wins. The last field of a layout takes the rest
//! of the residual, commas included.

use std::collections::HashMap;

use cqbridge_contracts::{MessageInput, MessageSegment};
use regex::Regex;

/// Types whose parameter string is carried through verbatim as `data.text`.
const PASSTHROUGH_TYPES: &[&str] = &["reply", "forward", "node"];

struct TagSpec {
    kind: &'static str,
    layouts: &'static [&'static [&'static str]],
    /// Fill fields of the first layout that a shorter layout did not capture.
    pad_missing: bool,
}

#[rustfmt::skip]
const TAG_SPECS: &[TagSpec] = &[
    TagSpec { kind: "face", layouts: &[&["id"]], pad_missing: false },
    TagSpec { kind: "image", layouts: &[&["file"]], pad_missing: false },
    TagSpec { kind: "record", layouts: &[&["file"]], pad_missing: false },
    TagSpec { kind: "video", layouts: &[&["file"]], pad_missing: false },
    TagSpec { kind: "at", layouts: &[&["qq"]], pad_missing: false },
    TagSpec { kind: "rps", layouts: &[&[]], pad_missing: false },
    TagSpec { kind: "dice", layouts: &[&[]], pad_missing: false },
    TagSpec { kind: "shake", layouts: &[&[]], pad_missing: false },
    TagSpec { kind: "anonymous", layouts: &[&[]], pad_missing: false },
    TagSpec { kind: "poke", layouts: &[&["type", "id"]], pad_missing: false },
    TagSpec {
        kind: "share",
        layouts: &[
            &["url", "title", "content", "image"],
            &["url", "title", "content"],
            &["url", "title", "image"],
            &["url", "title"],
        ],
        pad_missing: true,
    },
    TagSpec { kind: "contact", layouts: &[&["type", "id"]], pad_missing: false },
    TagSpec {
        kind: "location",
        layouts: &[
            &["lat", "lon", "title", "content"],
            &["lat", "lon", "title"],
            &["lat", "lon", "content"],
            &["lat", "lon"],
        ],
        pad_missing: true,
    },
    TagSpec {
        kind: "music",
        layouts: &[
            &["type", "url", "audio", "title", "content", "image"],
            &["type", "id"],
        ],
        pad_missing: false,
    },
    TagSpec { kind: "xml", layouts: &[&["data"]], pad_missing: false },
    TagSpec { kind: "json", layouts: &[&["data"]], pad_missing: false },
    TagSpec { kind: "emoji", layouts: &[&["id"]], pad_missing: false },
];

struct Layout {
    fields: &'static [&'static str],
    /// `None` for parameterless layouts, which accept any residual.
    pattern: Option<Regex>,
}

impl Layout {
    fn compile(fields: &'static [&'static str]) -> Result<Self, regex::Error> {
        if fields.is_empty() {
            return Ok(Self {
                fields,
                pattern: None,
            });
        }
        let last = fields.len() - 1;
        let body: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let capture = if i == last { "(.*)" } else { "(.*?)" };
                format!("{}={capture}", regex::escape(field))
            })
            .collect();
        Ok(Self {
            fields,
            pattern: Some(Regex::new(&format!("(?s)^{}$", body.join(",")))?),
        })
    }

    fn capture(&self, residual: &str) -> Option<Vec<(&'static str, String)>> {
        let Some(pattern) = &self.pattern else {
            return Some(Vec::new());
        };
        let caps = pattern.captures(residual)?;
        Some(
            self.fields
                .iter()
                .enumerate()
                .map(|(i, field)| {
                    let value = caps.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                    (*field, value.to_string())
                })
                .collect(),
        )
    }
}

struct TagGrammar {
    layouts: Vec<Layout>,
    pad_missing: bool,
}

/// Compiled inline-tag grammars. Built once at startup and shared.
pub struct SegmentCodec {
    tag: Regex,
    grammars: HashMap<&'static str, TagGrammar>,
    pub(crate) translate: crate::tags::TagTranslator,
}

impl SegmentCodec {
    pub fn new() -> Result<Self, regex::Error> {
        let mut grammars = HashMap::new();
        for spec in TAG_SPECS {
            let layouts = spec
                .layouts
                .iter()
                .map(|fields| Layout::compile(*fields))
                .collect::<Result<Vec<_>, _>>()?;
            grammars.insert(
                spec.kind,
                TagGrammar {
                    layouts,
                    pad_missing: spec.pad_missing,
                },
            );
        }
        Ok(Self {
            tag: Regex::new(r"(?s)\[CQ:(.*?)\]")?,
            grammars,
            translate: crate::tags::TagTranslator::new()?,
        })
    }

    /// Normalizes any accepted message shape into segments. Segment input is
    /// returned as is, so the operation is idempotent.
    pub fn to_segments(&self, input: MessageInput) -> Vec<MessageSegment> {
        match input {
            MessageInput::Segments(segments) => segments,
            MessageInput::Segment(segment) => vec![segment],
            MessageInput::Text(text) => self.parse_text(&text),
        }
    }

    /// Splits a string on `[CQ:...]` tags, keeping input order.
    pub fn parse_text(&self, text: &str) -> Vec<MessageSegment> {
        let mut segments = Vec::new();
        let mut cursor = 0;
        for caps in self.tag.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > cursor {
                segments.push(MessageSegment::text(&text[cursor..whole.start()]));
            }
            let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            segments.push(self.parse_tag(whole.as_str(), body));
            cursor = whole.end();
        }
        if cursor < text.len() {
            segments.push(MessageSegment::text(&text[cursor..]));
        }
        if segments.is_empty() {
            segments.push(MessageSegment::text(text));
        }
        segments
    }

    fn parse_tag(&self, raw: &str, body: &str) -> MessageSegment {
        let (kind, residual) = body.split_once(',').unwrap_or((body, ""));

        if PASSTHROUGH_TYPES.contains(&kind) {
            return MessageSegment::new(kind, [("text", residual.to_string())]);
        }

        let Some(grammar) = self.grammars.get(kind) else {
            return MessageSegment::error(raw);
        };

        for layout in &grammar.layouts {
            let Some(mut fields) = layout.capture(residual) else {
                continue;
            };
            if grammar.pad_missing {
                if let Some(full) = grammar.layouts.first() {
                    for field in full.fields {
                        if !fields.iter().any(|(name, _)| name == field) {
                            fields.push((*field, String::new()));
                        }
                    }
                }
            }
            return MessageSegment::new(kind, fields);
        }
        MessageSegment::error(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SegmentCodec {
        SegmentCodec::new().unwrap()
    }

    fn seg(kind: &str, pairs: &[(&'static str, &str)]) -> MessageSegment {
        MessageSegment::new(kind, pairs.iter().map(|(k, v)| (*k, v.to_string())))
    }

    #[test]
    fn mention_then_text() {
        let out = codec().to_segments("[CQ:at,qq=12345]hello".into());
        assert_eq!(
            out,
            vec![seg("at", &[("qq", "12345")]), MessageSegment::text("hello")]
        );
    }

    #[test]
    fn text_runs_keep_their_position() {
        let out = codec().parse_text("a[CQ:face,id=1]b[CQ:face,id=2][CQ:dice]c");
        let kinds: Vec<&str> = out.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(kinds, ["text", "face", "text", "face", "dice", "text"]);
        assert_eq!(out[0].get("text"), "a");
        assert_eq!(out[2].get("text"), "b");
        assert_eq!(out[3].get("id"), "2");
        assert_eq!(out[5].get("text"), "c");
    }

    #[test]
    fn plain_text_is_a_single_segment() {
        let c = codec();
        assert_eq!(c.parse_text("just words"), vec![MessageSegment::text("just words")]);
        assert_eq!(c.parse_text(""), vec![MessageSegment::text("")]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let c = codec();
        for input in [
            "",
            "plain",
            "[CQ:at,qq=1] hi [CQ:share,url=u,title=t]",
            "[CQ:zzz,foo=bar]",
            "[CQ:image,file=x.jpg]tail",
        ] {
            let once = c.to_segments(input.into());
            let twice = c.to_segments(MessageInput::Segments(once.clone()));
            assert_eq!(once, twice, "{input}");
        }
    }

    #[test]
    fn unknown_tag_becomes_error_segment() {
        let out = codec().to_segments("[CQ:zzz,foo=bar]".into());
        assert_eq!(out, vec![MessageSegment::error("[CQ:zzz,foo=bar]")]);
    }

    #[test]
    fn malformed_parameters_become_error_segment() {
        let c = codec();
        assert_eq!(
            c.parse_text("[CQ:face]"),
            vec![MessageSegment::error("[CQ:face]")]
        );
        assert_eq!(
            c.parse_text("[CQ:poke,id=1]"),
            vec![MessageSegment::error("[CQ:poke,id=1]")]
        );
    }

    #[test]
    fn share_layouts_resolve_optional_fields() {
        let c = codec();
        assert_eq!(
            c.parse_text("[CQ:share,url=U,title=T,content=C]"),
            vec![seg(
                "share",
                &[("url", "U"), ("title", "T"), ("content", "C"), ("image", "")]
            )]
        );
        assert_eq!(
            c.parse_text("[CQ:share,url=U,title=T,image=I]"),
            vec![seg(
                "share",
                &[("url", "U"), ("title", "T"), ("content", ""), ("image", "I")]
            )]
        );
        assert_eq!(
            c.parse_text("[CQ:share,url=U,title=T,content=C,image=I]")[0].get("image"),
            "I"
        );
        assert_eq!(c.parse_text("[CQ:share,url=U,title=T]")[0].get("content"), "");
    }

    #[test]
    fn location_layouts() {
        let c = codec();
        let out = c.parse_text("[CQ:location,lat=1.5,lon=2.5,content=here]");
        assert_eq!(
            out,
            vec![seg(
                "location",
                &[("lat", "1.5"), ("lon", "2.5"), ("title", ""), ("content", "here")]
            )]
        );
    }

    #[test]
    fn music_prefers_custom_layout() {
        let c = codec();
        let custom =
            c.parse_text("[CQ:music,type=custom,url=u,audio=a,title=t,content=c,image=i]");
        assert_eq!(custom[0].get("audio"), "a");
        assert_eq!(custom[0].data.len(), 6);

        let catalog = c.parse_text("[CQ:music,type=qq,id=123]");
        assert_eq!(catalog, vec![seg("music", &[("type", "qq"), ("id", "123")])]);
    }

    #[test]
    fn passthrough_types_keep_parameters() {
        let out = codec().parse_text("[CQ:reply,id=99]ok");
        assert_eq!(out[0], seg("reply", &[("text", "id=99")]));
        assert_eq!(out[1], MessageSegment::text("ok"));
    }

    #[test]
    fn last_field_takes_the_rest() {
        let out = codec().parse_text("[CQ:image,file=a.jpg,cache=0]");
        assert_eq!(out, vec![seg("image", &[("file", "a.jpg,cache=0")])]);
    }

    #[test]
    fn parameterless_types_ignore_residual() {
        let out = codec().parse_text("[CQ:shake][CQ:rps,x=1]");
        assert_eq!(out, vec![seg("shake", &[]), seg("rps", &[])]);
    }
}
