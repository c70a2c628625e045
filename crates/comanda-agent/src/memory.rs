//! Per-user conversation memory.
//!
//! Append-only from the caller's point of view, with three write-time
//! filters: exact duplicates, near duplicates (word-overlap similarity
//! against the most recent messages of the same role) and a window cap that
//! keeps the founding messages of a conversation plus the most recent ones.
//! A correction from the customer evicts the assistant message it corrects.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Light conversational patterns detected in customer messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPattern {
    Correction,
    Interruption,
    ClarificationRequest,
    RepeatRequest,
}

static PATTERNS: LazyLock<Vec<(ConversationPattern, Regex)>> = LazyLock::new(|| {
    [
        (
            ConversationPattern::Correction,
            r"(?i)\b(no,? actually|actually|i meant|correction|not that one|na verdade|quis dizer|me enganei|corrigindo|errei)\b",
        ),
        (
            ConversationPattern::Interruption,
            r"(?i)\b(wait|stop|hold on|never ?mind|espera|pera|peraí|pare|calma)\b",
        ),
        (
            ConversationPattern::ClarificationRequest,
            r"(?i)(what do you mean|i don'?t understand|didn'?t understand|como assim|não entendi|nao entendi|o que (você|voce|vc) quer dizer)",
        ),
        (
            ConversationPattern::RepeatRequest,
            r"(?i)\b(repeat|say (that|it) again|come again|repete|repita|de novo|fala de novo)\b",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, re)| Regex::new(re).ok().map(|re| (pattern, re)))
    .collect()
});

/// Detect conversational patterns in a message
pub fn detect_patterns(content: &str) -> Vec<ConversationPattern> {
    PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(content))
        .map(|(pattern, _)| *pattern)
        .collect()
}

/// One stored message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub patterns: Vec<ConversationPattern>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            priority: Priority::Normal,
            patterns: Vec::new(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Everything remembered about one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredContext {
    pub recent_messages: Vec<ConversationMessage>,
    pub customer_context: Map<String, Value>,
    pub last_activity: DateTime<Utc>,
}

impl StoredContext {
    fn new() -> Self {
        Self {
            recent_messages: Vec::new(),
            customer_context: Map::new(),
            last_activity: Utc::now(),
        }
    }
}

/// Memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum stored messages per user
    pub max_messages: usize,
    /// Messages at the start of a conversation that survive capping
    pub founding_messages: usize,
    /// Word-overlap score at or above which a message is a near duplicate
    pub similarity_threshold: f64,
    /// How many recent same-role messages are compared for near duplicates
    pub similarity_window: usize,
    /// Inactivity after which a context may be purged
    pub ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            founding_messages: 5,
            similarity_threshold: 0.85,
            similarity_window: 5,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

/// What happened to an appended message
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Stored {
        patterns: Vec<ConversationPattern>,
        /// Whether a correction evicted the last assistant message
        evicted: bool,
    },
    ExactDuplicate,
    SimilarDuplicate {
        score: f64,
    },
}

impl AppendOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, AppendOutcome::Stored { .. })
    }
}

/// Word-overlap (Jaccard) similarity of two texts, in `[0, 1]`
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = word_set(a);
    let b = word_set(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Conversation memory for all users
pub struct MemoryLog {
    config: MemoryConfig,
    contexts: DashMap<String, StoredContext>,
}

impl MemoryLog {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            contexts: DashMap::new(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Append a message, applying duplicate suppression, pattern handling
    /// and window capping.
    pub fn append(&self, user_id: &str, mut message: ConversationMessage) -> AppendOutcome {
        let mut entry = self
            .contexts
            .entry(user_id.to_string())
            .or_insert_with(StoredContext::new);
        let context = entry.value_mut();

        if context
            .recent_messages
            .iter()
            .any(|m| m.role == message.role && m.content == message.content)
        {
            tracing::debug!(user_id = %user_id, "Dropping exact duplicate message");
            return AppendOutcome::ExactDuplicate;
        }

        let best = context
            .recent_messages
            .iter()
            .rev()
            .filter(|m| m.role == message.role)
            .take(self.config.similarity_window)
            .map(|m| similarity(&m.content, &message.content))
            .fold(0.0_f64, f64::max);
        if best >= self.config.similarity_threshold {
            tracing::debug!(user_id = %user_id, score = best, "Dropping near-duplicate message");
            return AppendOutcome::SimilarDuplicate { score: best };
        }

        let patterns = if message.role == Role::Human {
            detect_patterns(&message.content)
        } else {
            Vec::new()
        };

        let mut evicted = false;
        if patterns.contains(&ConversationPattern::Correction) {
            if let Some(idx) = context
                .recent_messages
                .iter()
                .rposition(|m| m.role == Role::Assistant)
            {
                context.recent_messages.remove(idx);
                evicted = true;
                tracing::debug!(user_id = %user_id, "Correction evicted last assistant message");
            }
        }
        if patterns.contains(&ConversationPattern::Interruption) {
            message.priority = Priority::High;
        }

        message.patterns = patterns.clone();
        context.last_activity = message.timestamp;
        context.recent_messages.push(message);
        cap_window(
            &mut context.recent_messages,
            self.config.max_messages,
            self.config.founding_messages,
        );

        AppendOutcome::Stored { patterns, evicted }
    }

    /// Read a user's context, creating an empty one on first contact
    pub fn read(&self, user_id: &str) -> StoredContext {
        self.contexts
            .entry(user_id.to_string())
            .or_insert_with(StoredContext::new)
            .clone()
    }

    /// The last `n` stored messages of a user, oldest first
    pub fn recent(&self, user_id: &str, n: usize) -> Vec<ConversationMessage> {
        self.contexts
            .get(user_id)
            .map(|c| {
                let messages = &c.recent_messages;
                messages[messages.len().saturating_sub(n)..].to_vec()
            })
            .unwrap_or_default()
    }

    /// Set one key of the user's customer context
    pub fn update_context(&self, user_id: &str, key: impl Into<String>, value: Value) {
        let mut entry = self
            .contexts
            .entry(user_id.to_string())
            .or_insert_with(StoredContext::new);
        entry.customer_context.insert(key.into(), value);
        entry.last_activity = Utc::now();
    }

    /// Drop contexts idle for longer than the configured TTL. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::seconds(self.config.ttl_secs as i64);
        let before = self.contexts.len();
        self.contexts.retain(|_, c| now - c.last_activity <= ttl);
        before - self.contexts.len()
    }

    /// Number of users with a stored context
    pub fn user_count(&self) -> usize {
        self.contexts.len()
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

/// Keep the first `founding` messages and the most recent `max - founding`.
fn cap_window(messages: &mut Vec<ConversationMessage>, max: usize, founding: usize) {
    if messages.len() <= max {
        return;
    }
    let founding = founding.min(max);
    let tail_start = messages.len() - (max - founding);
    messages.drain(founding..tail_start);
}
