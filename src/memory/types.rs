//! Core memory type definitions.
//!
//! Defines [`Tier`] (the three lifetime tiers), [`Scope`] (visibility classes),
//! [`MemoryMetadata`] (the bounded metadata map), [`NewMemory`] (a write request
//! after embedding) and [`MemoryRecord`] (a full stored row).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Lifetime tier of a memory. Chosen by the writer, never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Minutes to hours. Swept on expiry.
    ShortTerm,
    /// Days. Swept on expiry.
    MediumTerm,
    /// Kept until an administrative delete. Tracks access counts.
    LongTerm,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::ShortTerm, Tier::MediumTerm, Tier::LongTerm];

    /// Tiers whose rows carry `expires_at` and are eligible for sweeps.
    pub const EXPIRING: [Tier; 2] = [Tier::ShortTerm, Tier::MediumTerm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::MediumTerm => "medium_term",
            Self::LongTerm => "long_term",
        }
    }

    /// Backing table for this tier.
    pub fn table(&self) -> &'static str {
        match self {
            Self::ShortTerm => "memories_short_term",
            Self::MediumTerm => "memories_medium_term",
            Self::LongTerm => "memories_long_term",
        }
    }

    pub fn expires(&self) -> bool {
        !matches!(self, Self::LongTerm)
    }

    /// Relative lifetime, used to validate promotions (target must outlive source).
    pub fn rank(&self) -> u8 {
        match self {
            Self::ShortTerm => 0,
            Self::MediumTerm => 1,
            Self::LongTerm => 2,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "short_term" | "short" => Ok(Self::ShortTerm),
            "medium_term" | "medium" => Ok(Self::MediumTerm),
            "long_term" | "long" => Ok(Self::LongTerm),
            _ => Err(format!("unknown tier: {s}")),
        }
    }
}

/// Visibility class of a record, and the access level a caller holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Baseline. Records are visible to their owner and to elevated callers.
    Restricted,
    /// Developer-visible. Records are visible to every caller with baseline access.
    Shared,
    /// Elevated. Callers holding it see everything; only they may write it.
    Full,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Restricted, Scope::Shared, Scope::Full];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restricted => "restricted",
            Self::Shared => "shared",
            Self::Full => "full",
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Full)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "restricted" => Ok(Self::Restricted),
            "shared" => Ok(Self::Shared),
            "full" => Ok(Self::Full),
            _ => Err(format!("unknown scope: {s}")),
        }
    }
}

/// Metadata attached to a memory. Only these keys are recognized.
///
/// | key          | tiers              |
/// |--------------|--------------------|
/// | `source`     | all                |
/// | `session_id` | short, medium      |
/// | `topic`      | long               |
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryMetadata {
    /// Where the memory came from (tool name, agent, import job).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Conversation or session the memory was captured in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Curated topic for long-lived knowledge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl MemoryMetadata {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.session_id.is_none() && self.topic.is_none()
    }

    /// Reject keys that are not recognized for `tier`.
    pub fn validate_for(&self, tier: Tier) -> Result<()> {
        if self.session_id.is_some() && tier == Tier::LongTerm {
            return Err(MemoryError::validation(
                "metadata key 'session_id' is not allowed on long_term memories",
            ));
        }
        if self.topic.is_some() && tier != Tier::LongTerm {
            return Err(MemoryError::validation(format!(
                "metadata key 'topic' is only allowed on long_term memories, not {tier}"
            )));
        }
        Ok(())
    }
}

/// Importance used when a writer does not supply one.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// A write request after its content has been embedded.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub tier: Tier,
    pub owner_id: String,
    pub scope: Scope,
    pub kind: String,
    pub content: String,
    pub importance: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<MemoryMetadata>,
    /// Caller-supplied idempotency token.
    pub request_token: Option<String>,
}

impl NewMemory {
    pub fn new(
        tier: Tier,
        owner_id: impl Into<String>,
        scope: Scope,
        kind: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tier,
            owner_id: owner_id.into(),
            scope,
            kind: kind.into(),
            content: content.into(),
            importance: None,
            tags: None,
            metadata: None,
            request_token: None,
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_request_token(mut self, token: impl Into<String>) -> Self {
        self.request_token = Some(token.into());
        self
    }

    /// Check every field that does not need the database.
    pub fn validate(&self) -> Result<()> {
        if self.owner_id.trim().is_empty() {
            return Err(MemoryError::validation("owner_id must not be empty"));
        }
        if self.content.trim().is_empty() {
            return Err(MemoryError::validation("content must not be empty"));
        }
        if self.kind.trim().is_empty() {
            return Err(MemoryError::validation("kind must not be empty"));
        }
        if let Some(importance) = self.importance {
            validate_importance(importance)?;
        }
        if let Some(tags) = &self.tags {
            if self.tier != Tier::LongTerm && !tags.is_empty() {
                return Err(MemoryError::validation(format!(
                    "tags are only allowed on long_term memories, not {}",
                    self.tier
                )));
            }
            if tags.iter().any(|t| t.trim().is_empty()) {
                return Err(MemoryError::validation("tags must not be empty strings"));
            }
        }
        if let Some(metadata) = &self.metadata {
            metadata.validate_for(self.tier)?;
        }
        if let Some(token) = &self.request_token {
            if token.trim().is_empty() {
                return Err(MemoryError::validation("request_token must not be empty"));
            }
        }
        Ok(())
    }

    /// Tags with duplicates removed, first occurrence wins.
    pub fn normalized_tags(&self) -> Option<Vec<String>> {
        let tags = self.tags.as_ref()?;
        let mut seen = std::collections::HashSet::new();
        let deduped: Vec<String> = tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if deduped.is_empty() {
            None
        } else {
            Some(deduped)
        }
    }
}

pub fn validate_importance(importance: f64) -> Result<()> {
    if !importance.is_finite() || !(0.0..=1.0).contains(&importance) {
        return Err(MemoryError::validation(
            "importance must be between 0.0 and 1.0",
        ));
    }
    Ok(())
}

/// A stored memory, as returned by lookups and searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub tier: Tier,
    pub owner_id: String,
    pub scope: Scope,
    pub kind: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub importance: f64,
    /// RFC 3339 UTC, microsecond precision.
    pub created_at: String,
    /// `None` on long-term records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MemoryMetadata>,
    /// Long-term only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_count: Option<u32>,
    /// Long-term only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<String>,
}

impl MemoryRecord {
    /// Whether the record is past its expiry at `now`. Long-term records never expire.
    pub fn is_expired_at(&self, now: &str) -> bool {
        self.expires_at.as_deref().is_some_and(|e| e <= now)
    }

    /// Drop the embedding before handing the record to a surface that does not need it.
    pub fn without_embedding(mut self) -> Self {
        self.embedding = Vec::new();
        self
    }
}

/// Canonical timestamp format. Fixed width so that SQL string comparison orders correctly.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}
