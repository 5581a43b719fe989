//! Subjects, practice items and the buckets they fall into.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque learner identifier owned by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub i64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Practice item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl ItemId {
    /// Placeholder carried by generated items until the sink persists them.
    pub const UNASSIGNED: ItemId = ItemId(0);

    pub fn is_assigned(&self) -> bool {
        *self != Self::UNASSIGNED
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of practice item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Vocabulary,
    FillInBlank,
    QuestionAnswer,
    ReadingComprehension,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Vocabulary,
        ItemKind::FillInBlank,
        ItemKind::QuestionAnswer,
        ItemKind::ReadingComprehension,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Vocabulary => "vocabulary",
            ItemKind::FillInBlank => "fill_in_blank",
            ItemKind::QuestionAnswer => "question_answer",
            ItemKind::ReadingComprehension => "reading_comprehension",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vocabulary" => Some(ItemKind::Vocabulary),
            "fill_in_blank" => Some(ItemKind::FillInBlank),
            "question_answer" | "qa" => Some(ItemKind::QuestionAnswer),
            "reading_comprehension" => Some(ItemKind::ReadingComprehension),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket key: one (language, level, kind) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicKey {
    pub language: String,
    pub level: String,
    pub kind: ItemKind,
}

impl TopicKey {
    pub fn new(language: impl Into<String>, level: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            language: language.into(),
            level: level.into(),
            kind,
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.language, self.level, self.kind)
    }
}

/// A single practice unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub language: String,
    pub level: String,
    pub kind: ItemKind,
    pub topic: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl Item {
    /// Build an item that has not been persisted yet.
    pub fn unsaved(key: &TopicKey, topic: Option<String>, content: serde_json::Value) -> Self {
        Self {
            id: ItemId::UNASSIGNED,
            language: key.language.clone(),
            level: key.level.clone(),
            kind: key.kind,
            topic,
            content,
        }
    }

    pub fn key(&self) -> TopicKey {
        TopicKey::new(self.language.clone(), self.level.clone(), self.kind)
    }
}

/// An active learner as reported by the item catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub subject_id: SubjectId,
    pub language: String,
    pub level: String,
    /// Backend provider used when generating for this subject.
    pub provider: Option<String>,
}

impl SubjectProfile {
    pub fn new(subject_id: SubjectId, language: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            subject_id,
            language: language.into(),
            level: level.into(),
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// The buckets this subject practices, one per requested kind.
    pub fn buckets(&self, kinds: &[ItemKind]) -> Vec<TopicKey> {
        kinds
            .iter()
            .map(|kind| TopicKey::new(self.language.clone(), self.level.clone(), *kind))
            .collect()
    }
}
