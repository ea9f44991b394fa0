use serde_json::Value;

/// What the reducer cares about in one decoded line.
///
/// Two host dialects are understood:
/// - chat: `{"message": {"role": "assistant", "content": "<delta>"}, "done": false}`
/// - generate: `{"response": "<delta>", "done": false}`
///
/// Both end with a record carrying `"done": true`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamRecord {
    pub delta: Option<String>,
    pub done: bool,
}

impl StreamRecord {
    /// `None` when the record carries neither text nor a terminal flag.
    pub fn from_value(value: &Value) -> Option<Self> {
        let delta = value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .or_else(|| value.get("response").and_then(Value::as_str))
            .map(str::to_string);
        let done = value.get("done").and_then(Value::as_bool).unwrap_or(false);

        if delta.is_none() && !done {
            return None;
        }
        Some(Self { delta, done })
    }

    /// Text to append, skipping empty deltas.
    pub fn text(&self) -> Option<&str> {
        self.delta.as_deref().filter(|s| !s.is_empty())
    }
}
