//! Textual translation between the engine's own inline markup and `[CQ:...]`
//! tags, for the subset that has a counterpart on both sides.

use regex::{Captures, Regex};

use crate::segment::SegmentCodec;

pub(crate) struct TagTranslator {
    engine_face: Regex,
    engine_pic: Regex,
    engine_voice: Regex,
    standard_face: Regex,
    standard_image: Regex,
    standard_record: Regex,
}

impl TagTranslator {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            engine_face: Regex::new(r"\[Face(.*?)\.gif]")?,
            engine_pic: Regex::new(r"\[pic=\{(.*?)-(.*?)-(.*?)-(.*?)-(.*?)\}(\..*?),(.*?)\]")?,
            engine_voice: Regex::new(r"\[Voi=\{(.*?)-(.*?)-(.*?)-(.*?)-(.*?)\}(\..*?),(.*?)\]")?,
            standard_face: Regex::new(r"\[CQ:face,id=(.*?)\]")?,
            standard_image: Regex::new(r"\[CQ:image,file=(.*?)\]")?,
            standard_record: Regex::new(r"\[CQ:record,file=(.*?)\]")?,
        })
    }
}

fn group<'t>(caps: &Captures<'t>, i: usize) -> &'t str {
    caps.get(i).map(|m| m.as_str()).unwrap_or_default()
}

/// Joins the five hyphen-separated parts of a `{a-b-c-d-e}` asset key.
fn asset_key(caps: &Captures<'_>) -> String {
    (1..=5).map(|i| group(caps, i)).collect()
}

impl SegmentCodec {
    /// Engine markup to `[CQ:...]` tags.
    pub fn engine_to_standard(&self, message: &str) -> String {
        let t = &self.translate;
        let message = message
            .replace("[@", "[CQ:at,qq=")
            .replace("[emoji", "[CQ:emoji,id=");
        let message = t.engine_face.replace_all(&message, |caps: &Captures<'_>| {
            format!("[CQ:face,id={}]", group(caps, 1))
        });
        let message = t.engine_pic.replace_all(&message, |caps: &Captures<'_>| {
            format!("[CQ:image,file={}{}]", asset_key(caps), group(caps, 6))
        });
        let message = t.engine_voice.replace_all(&message, |caps: &Captures<'_>| {
            format!("[CQ:record,file={}]", asset_key(caps))
        });
        message.into_owned()
    }

    /// `[CQ:...]` tags to engine markup.
    pub fn standard_to_engine(&self, message: &str) -> String {
        let t = &self.translate;
        let message = message
            .replace("[CQ:at,qq=", "[@")
            .replace("[CQ:emoji,id=", "[emoji");
        let message = t.standard_face.replace_all(&message, |caps: &Captures<'_>| {
            format!("[Face{}.gif]", group(caps, 1))
        });
        let message = t.standard_image.replace_all(&message, |caps: &Captures<'_>| {
            format!("[pic={}]", group(caps, 1))
        });
        let message = t.standard_record.replace_all(&message, |caps: &Captures<'_>| {
            format!("[Voi={}]", group(caps, 1))
        });
        message.into_owned()
    }
}
