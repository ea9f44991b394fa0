use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Deserializer, Serialize };
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        write!(f, "{}", s)
    }
}

/// One entry of the conversation log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "isStreaming")]
    pub streaming: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            streaming: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Empty assistant message shown as a typing indicator until the first delta lands.
    pub fn placeholder() -> Self {
        Self {
            streaming: true,
            ..Self::new(Role::Assistant, String::new())
        }
    }

    pub fn to_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// `{role, content}` pair as sent to the model host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn streaming(model: impl Into<String>, messages: Vec<ChatTurn>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl ModelDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            modified_at: Some(Utc::now()),
        }
    }

    pub fn display_size(&self) -> String {
        if self.size == 0 {
            return "Unknown size".to_string();
        }
        let gb = (self.size as f64) / (1024.0 * 1024.0 * 1024.0);
        if gb > 1.0 {
            format!("{:.1}GB", gb)
        } else {
            format!("{:.0}MB", (self.size as f64) / (1024.0 * 1024.0))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

// Hosts disagree on timestamp precision and offsets; an unparseable value is not worth
// failing the whole listing over.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where D: Deserializer<'de>
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(
        raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
    )
}
