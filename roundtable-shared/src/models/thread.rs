use serde::{Deserialize, Serialize};

/// Interaction style the participants are prompted with.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreadMode {
    #[default]
    Brainstorming,
    Analyzing,
    Debating,
    Solving,
}

impl ThreadMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Brainstorming => "brainstorming",
            Self::Analyzing => "analyzing",
            Self::Debating => "debating",
            Self::Solving => "solving",
        }
    }
}

impl TryFrom<&str> for ThreadMode {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "brainstorming" => Ok(Self::Brainstorming),
            "analyzing" => Ok(Self::Analyzing),
            "debating" => Ok(Self::Debating),
            "solving" => Ok(Self::Solving),
            _ => Err("invalid thread mode"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    #[default]
    Active,
    Archived,
    Deleted,
}

/// Conversation container owning rounds, participants, and messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub mode: ThreadMode,
    #[serde(default)]
    pub enable_web_search: bool,
    #[serde(default)]
    pub status: ThreadStatus,
}

impl Thread {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: ThreadMode::default(),
            enable_web_search: false,
            status: ThreadStatus::default(),
        }
    }

    #[must_use]
    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.enable_web_search = enabled;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ThreadMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A configured AI responder. Identity is stable across rounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub model_id: String,
    /// Lower values respond first.
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl Participant {
    #[must_use]
    pub fn new(id: impl Into<String>, model_id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            model_id: model_id.into(),
            priority,
            is_enabled: true,
        }
    }
}

/// Enabled participants in response order. Equal priorities keep their configured order.
#[must_use]
pub fn ordered_participants(participants: &[Participant]) -> Vec<&Participant> {
    let mut enabled: Vec<&Participant> = participants.iter().filter(|p| p.is_enabled).collect();
    enabled.sort_by_key(|participant| participant.priority);
    enabled
}
