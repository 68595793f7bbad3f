use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum AppError {
    Http(reqwest::Error),
    Json(serde_json::Error),
    Io(std::io::Error),
    Sqlite(rusqlite::Error),
    Other(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Http(e) => write!(f, "{}", e),
            AppError::Json(e) => write!(f, "{}", e),
            AppError::Io(e) => write!(f, "{}", e),
            AppError::Sqlite(e) => write!(f, "{}", e),
            AppError::Other(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for AppError {}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        AppError::Http(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::Json(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        AppError::Sqlite(value)
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        AppError::Other(value)
    }
}

impl From<&str> for AppError {
    fn from(value: &str) -> Self {
        AppError::Other(value.to_string())
    }
}

/// Why a credential was refused. Each kind needs a different fix from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureKind {
    Missing,
    Invalid,
    Malformed,
}

impl AuthFailureKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Missing => "API key is not configured. Add your key in the profile settings.",
            Self::Invalid => "API key was rejected by the service. Check that it is still active.",
            Self::Malformed => "API key looks incomplete. Paste the full key and try again.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailureKind {
    Timeout,
    Network(String),
    Aborted,
    Http { status: u16, message: String },
    MalformedResponse,
}

impl TransportFailureKind {
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout => "Request timed out. Check your network connection.".to_string(),
            Self::Network(_) => "Network connection failed. Check your network settings.".to_string(),
            Self::Aborted => "Request was cancelled.".to_string(),
            Self::Http { status, message } => match status {
                400 => format!("Invalid request parameters: {}", message),
                429 => "Too many requests. Please retry later.".to_string(),
                503 => "Model service is overloaded. Please retry later.".to_string(),
                504 => "Request timed out. Please retry.".to_string(),
                _ if message.is_empty() => format!("API request failed: {}", status),
                _ => message.clone(),
            },
            Self::MalformedResponse => "Unexpected response format from the API.".to_string(),
        }
    }
}

/// Failures surfaced by the chat engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatError {
    /// An exchange is already in flight or the error cooldown is still running.
    Busy,
    InvalidAttachment { index: usize, reason: String },
    UnknownModel(String),
    TransportFailure(TransportFailureKind),
    AuthFailure(AuthFailureKind),
    MessageNotFound(String),
    NoUserMessage,
    EmptyInput,
    TooManyAttachments { count: usize, max: usize },
    Storage(String),
}

impl ChatError {
    /// Text for the transient notification shown next to an error message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Busy => "Please wait for the current reply to finish.".to_string(),
            Self::InvalidAttachment { index, .. } => {
                format!("Image {} has an invalid format. Please upload it again.", index + 1)
            }
            Self::UnknownModel(model) => format!("No pricing information for model {}", model),
            Self::TransportFailure(kind) => kind.user_message(),
            Self::AuthFailure(kind) => kind.user_message().to_string(),
            Self::MessageNotFound(_) => "Message no longer exists.".to_string(),
            Self::NoUserMessage => "There is no earlier question to retry.".to_string(),
            Self::EmptyInput => "Type a message or attach an image first.".to_string(),
            Self::TooManyAttachments { max, .. } => {
                format!("You can attach at most {} images.", max)
            }
            Self::Storage(_) => "Saving failed. Please retry.".to_string(),
        }
    }
}

impl Display for ChatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::Busy => write!(f, "an exchange is already in flight"),
            ChatError::InvalidAttachment { index, reason } => {
                write!(f, "attachment {} is invalid: {}", index, reason)
            }
            ChatError::UnknownModel(model) => write!(f, "no pricing entry for model {}", model),
            ChatError::TransportFailure(kind) => write!(f, "transport failure: {:?}", kind),
            ChatError::AuthFailure(kind) => write!(f, "auth failure: {:?}", kind),
            ChatError::MessageNotFound(id) => write!(f, "message {} not found", id),
            ChatError::NoUserMessage => write!(f, "no user message precedes the target"),
            ChatError::EmptyInput => write!(f, "nothing to send"),
            ChatError::TooManyAttachments { count, max } => {
                write!(f, "{} attachments exceed the limit of {}", count, max)
            }
            ChatError::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<AppError> for ChatError {
    fn from(value: AppError) -> Self {
        ChatError::Storage(value.to_string())
    }
}
