use serde::{Deserialize, Serialize};

/// Known message kinds
///
/// Unknown kinds are preserved as [`MessageKind::Other`] so that newer
/// peers can introduce kinds without breaking older ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Welcome, // welcome
    Message, // message
    Error,   // error
    Ping,    // ping
    Pong,    // pong

    Other(String),
}

impl From<&str> for MessageKind {
    fn from(s: &str) -> Self {
        match s {
            "welcome" => Self::Welcome,
            "message" => Self::Message,
            "error" => Self::Error,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.to_string()
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Welcome => "welcome",
            Self::Message => "message",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Other(s) => s,
        };
        write!(f, "{s}")
    }
}
