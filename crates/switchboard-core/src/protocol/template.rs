//! Pre-serialized frames rendered per recipient.
//!
//! Broadcasts serialize one frame with a placeholder id and splice each
//! recipient's query id in, instead of re-encoding JSON per connection.

use bytes::{Bytes, BytesMut};
use serde_json::Value;

use super::next_frame;

/// 36 characters, the length of a UUID, so rendered frames keep their size.
pub const QUERY_ID_PLACEHOLDER: &str = "--------------QUERY-ID--------------";

/// A serialized frame with one query-id slot.
#[derive(Clone, Debug)]
pub struct FrameTemplate {
    bytes: Bytes,
    slot: Option<usize>,
}

impl FrameTemplate {
    /// Template for a `next` frame carrying `data`.
    pub fn next(data: Value) -> Self {
        Self::from_bytes(next_frame(QUERY_ID_PLACEHOLDER, data))
    }

    /// Wrap bytes already containing [`QUERY_ID_PLACEHOLDER`].
    pub fn from_bytes(bytes: Bytes) -> Self {
        let needle = QUERY_ID_PLACEHOLDER.as_bytes();
        let slot = bytes.windows(needle.len()).position(|w| w == needle);
        Self { bytes, slot }
    }

    /// The frame with the first placeholder replaced by `query_id`, escaped
    /// as the inside of a JSON string.
    pub fn render(&self, query_id: &str) -> Bytes {
        let Some(at) = self.slot else {
            return self.bytes.clone();
        };
        let quoted = Value::from(query_id).to_string();
        let escaped = &quoted.as_bytes()[1..quoted.len() - 1];
        let tail = at + QUERY_ID_PLACEHOLDER.len();
        let mut out = BytesMut::with_capacity(self.bytes.len() - QUERY_ID_PLACEHOLDER.len() + escaped.len());
        out.extend_from_slice(&self.bytes[..at]);
        out.extend_from_slice(escaped);
        out.extend_from_slice(&self.bytes[tail..]);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholder_is_uuid_length() {
        assert_eq!(QUERY_ID_PLACEHOLDER.len(), 36);
    }

    #[test]
    fn render_swaps_id() {
        let tpl = FrameTemplate::next(json!({"pres_page_cursor_stream": [{"xPercent": 1.5}]}));
        let frame: Value = serde_json::from_slice(&tpl.render("abc")).unwrap();
        assert_eq!(frame["id"], "abc");
        assert_eq!(frame["payload"]["data"]["pres_page_cursor_stream"][0]["xPercent"], 1.5);
    }

    #[test]
    fn renders_are_independent() {
        let tpl = FrameTemplate::next(json!({}));
        let a = tpl.render("a");
        let b = tpl.render("bb");
        assert!(std::str::from_utf8(&a).unwrap().contains(r#""id":"a""#));
        assert!(std::str::from_utf8(&b).unwrap().contains(r#""id":"bb""#));
    }

    #[test]
    fn only_first_placeholder_replaced() {
        let raw = format!(r#"{{"id":"{p}","x":"{p}"}}"#, p = QUERY_ID_PLACEHOLDER);
        let tpl = FrameTemplate::from_bytes(Bytes::from(raw));
        let out = String::from_utf8(tpl.render("q").to_vec()).unwrap();
        assert!(out.starts_with(r#"{"id":"q""#));
        assert!(out.contains(QUERY_ID_PLACEHOLDER));
    }

    #[test]
    fn render_escapes_id() {
        let tpl = FrameTemplate::next(json!({"rows": []}));
        for id in [r#"q"1"#, r"back\slash", "tab\tnew\nline", "ünï"] {
            let frame: Value = serde_json::from_slice(&tpl.render(id)).unwrap();
            assert_eq!(frame["id"], id);
            assert_eq!(&tpl.render(id)[..], &next_frame(id, json!({"rows": []}))[..]);
        }
    }

    #[test]
    fn missing_placeholder_passes_through() {
        let tpl = FrameTemplate::from_bytes(Bytes::from_static(b"{}"));
        assert_eq!(&tpl.render("q")[..], b"{}");
    }
}
