use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::AppError;
use crate::models::decision::Decision;
use crate::models::duplicate::{short_hash, DuplicateAction, GroupDecision, MemberDecision};
use crate::models::inventory::InventoryRecord;
use crate::services::retry;

const SUMMARY_EXCERPT_CHARS: usize = 200;

pub const SHORTCUT_REVIEW_REASONING: &str = "Suggested for shortcut - review recommended";

const DUPLICATE_SYSTEM_PROMPT: &str =
    "You decide which copy of a set of byte-identical files is authoritative. Respond only with JSON.";

const VERSION_SYSTEM_PROMPT: &str = "You are a document version analyzer. \
Determine if files are versions based on names, dates, and content summaries.";

/// Free-text completion service used to confirm or override heuristic
/// grouping decisions.
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, AppError>;
}

pub fn extract_json_payload(text: &str) -> Option<String> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(newline) = rest.find('\n') {
            let body = &rest[newline + 1..];
            if let Some(end) = body.find("```") {
                return Some(body[..end].trim().to_string());
            }
        }
    }

    let first = trimmed.find('{')?;
    let last = trimmed.rfind('}')?;
    if first <= last {
        return Some(trimmed[first..=last].to_string());
    }

    None
}

fn excerpt(summary: Option<&str>) -> String {
    match summary {
        Some(text) if text.chars().count() > SUMMARY_EXCERPT_CHARS => {
            let cut: String = text.chars().take(SUMMARY_EXCERPT_CHARS).collect();
            format!("{cut}...")
        }
        Some(text) => text.to_string(),
        None => "No summary available".to_string(),
    }
}

fn modified_label(record: &InventoryRecord) -> String {
    record
        .modified_at
        .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ---------------------------------------------------------------------------
// Duplicate groups
// ---------------------------------------------------------------------------

pub fn duplicate_prompt(content_hash: &str, members: &[InventoryRecord]) -> String {
    let hash_prefix = short_hash(content_hash);
    let files = members
        .iter()
        .map(|m| {
            format!(
                "- ID {}: {} (modified: {}, size: {} bytes)\n  Summary: {}",
                m.id,
                m.full_path(),
                modified_label(m),
                m.size_bytes,
                excerpt(m.summary.as_deref())
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"These files are byte-identical duplicates (same content, hash: {hash_prefix}...):

{files}

Decide:
1. Which file should be PRIMARY (the authoritative copy)?
2. For each other file, should it be:
   - SHORTCUT: replace with a shortcut to the primary
   - KEEP_BOTH: keep as a separate copy (e.g. a template used in several projects)
   - DELETE: remove entirely (only if clearly an obsolete backup)

Files in backup, archive or old folders are usually secondary. Cleaner paths are
usually authoritative. The most recently modified copy is usually current.

Respond in this exact JSON format:
{{
  "primary_id": <id of primary file>,
  "reasoning": "why this is primary",
  "decisions": {{
    "<id>": {{"action": "SHORTCUT|KEEP_BOTH|DELETE", "reasoning": "why"}}
  }}
}}

Respond ONLY with JSON."#
    )
}

#[derive(Debug, Deserialize)]
struct DuplicateResponse {
    primary_id: serde_json::Value,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    decisions: HashMap<String, MemberResponse>,
}

#[derive(Debug, Deserialize)]
struct MemberResponse {
    action: String,
    #[serde(default)]
    reasoning: Option<String>,
}

fn as_record_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses an override into a complete decision over `members`. Returns
/// `None` when the payload is unusable or names a primary outside the group.
/// Members the override leaves out stay shortcuts, and only the primary is
/// ever marked `keep_primary`.
pub fn parse_duplicate_response(text: &str, members: &[InventoryRecord]) -> Option<GroupDecision> {
    let payload = extract_json_payload(text)?;
    let parsed: DuplicateResponse = serde_json::from_str(&payload).ok()?;
    let primary_id = as_record_id(&parsed.primary_id)?;
    if !members.iter().any(|m| m.id == primary_id) {
        return None;
    }

    let overrides: HashMap<i64, MemberResponse> = parsed
        .decisions
        .into_iter()
        .filter_map(|(id, decision)| id.trim().parse::<i64>().ok().map(|id| (id, decision)))
        .collect();

    let decisions = members
        .iter()
        .map(|member| {
            if member.id == primary_id {
                return MemberDecision {
                    record_id: member.id,
                    action: DuplicateAction::KeepPrimary,
                    reasoning: parsed
                        .reasoning
                        .clone()
                        .unwrap_or_else(|| "Selected as primary".to_string()),
                };
            }
            let overridden = overrides.get(&member.id).and_then(|o| {
                o.action
                    .parse::<DuplicateAction>()
                    .ok()
                    .filter(|action| *action != DuplicateAction::KeepPrimary)
                    .map(|action| (action, o.reasoning.clone().unwrap_or_default()))
            });
            match overridden {
                Some((action, reasoning)) => MemberDecision {
                    record_id: member.id,
                    action,
                    reasoning,
                },
                None => MemberDecision {
                    record_id: member.id,
                    action: DuplicateAction::Shortcut,
                    reasoning: SHORTCUT_REVIEW_REASONING.to_string(),
                },
            }
        })
        .collect();

    Some(GroupDecision {
        primary_id,
        reasoning: parsed.reasoning,
        decisions,
    })
}

pub async fn decide_duplicate_group(
    service: &dyn DecisionService,
    content_hash: &str,
    members: &[InventoryRecord],
    attempts: usize,
) -> Decision<GroupDecision> {
    let prompt = duplicate_prompt(content_hash, members);
    let response = retry::with_retry(attempts, "duplicate decision", || {
        service.complete(&prompt, Some(DUPLICATE_SYSTEM_PROMPT))
    })
    .await;

    match response {
        Ok(text) => match parse_duplicate_response(&text, members) {
            Some(decision) => Decision::Confirmed(decision),
            None => {
                tracing::warn!(hash = short_hash(content_hash), "unusable duplicate decision response");
                Decision::Unavailable
            }
        },
        Err(err) => {
            tracing::warn!(hash = short_hash(content_hash), error = %err, "duplicate decision unavailable");
            Decision::Unavailable
        }
    }
}

// ---------------------------------------------------------------------------
// Version groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct VersionConfirmation {
    pub confirmed: bool,
    /// Index into the candidate list as presented in the prompt.
    pub current_index: Option<usize>,
    pub reasoning: String,
}

/// Candidates are listed in the order given, which callers keep sorted
/// oldest to newest so the returned index lines up with the chain.
pub fn version_prompt(members: &[InventoryRecord]) -> String {
    let files = members
        .iter()
        .enumerate()
        .map(|(idx, m)| {
            format!(
                "[{idx}] {}\n    Path: {}\n    Modified: {}\n    Summary: {}",
                m.current_name,
                m.current_path,
                modified_label(m),
                excerpt(m.summary.as_deref())
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let last = members.len().saturating_sub(1);

    format!(
        "Analyze these files to determine if they are versions of the same document:\n\n\
{files}\n\n\
Questions:\n\
1. Are these different versions of the same document? (yes/no)\n\
2. If yes, which file is the CURRENT (most recent) version? (provide index 0-{last})\n\
3. What is your reasoning?\n\n\
Respond in this exact format:\n\
CONFIRMED: yes/no\n\
CURRENT_INDEX: <number>\n\
REASONING: <your explanation>"
    )
}

/// Reads the `CONFIRMED:` / `CURRENT_INDEX:` / `REASONING:` reply. An index
/// outside `0..len` is dropped. A reply without a `CONFIRMED:` line is
/// unusable.
pub fn parse_version_response(text: &str, len: usize) -> Option<VersionConfirmation> {
    let mut confirmed = None;
    let mut current_index = None;
    let mut reasoning = None;

    for line in text.lines().map(str::trim) {
        let upper = line.to_ascii_uppercase();
        if let Some(rest) = upper.strip_prefix("CONFIRMED:") {
            confirmed = Some(rest.trim().starts_with("YES"));
        } else if upper.starts_with("CURRENT_INDEX:") {
            current_index = line
                .split(|c: char| !c.is_ascii_digit())
                .find(|token| !token.is_empty())
                .and_then(|token| token.parse::<usize>().ok())
                .filter(|idx| *idx < len);
        } else if upper.starts_with("REASONING:") {
            reasoning = line.split_once(':').map(|(_, r)| r.trim().to_string());
        }
    }

    Some(VersionConfirmation {
        confirmed: confirmed?,
        current_index,
        reasoning: reasoning.unwrap_or_else(|| text.trim().to_string()),
    })
}

pub async fn confirm_version_group(
    service: &dyn DecisionService,
    members: &[InventoryRecord],
    attempts: usize,
) -> Decision<VersionConfirmation> {
    let prompt = version_prompt(members);
    let response = retry::with_retry(attempts, "version confirmation", || {
        service.complete(&prompt, Some(VERSION_SYSTEM_PROMPT))
    })
    .await;

    match response {
        Ok(text) => match parse_version_response(&text, members.len()) {
            Some(confirmation) => Decision::Confirmed(confirmation),
            None => Decision::Unavailable,
        },
        Err(err) => {
            tracing::warn!(error = %err, "version confirmation unavailable");
            Decision::Unavailable
        }
    }
}

/// Confirms several groups with at most `concurrency` requests in flight.
/// Results come back in input order.
pub async fn confirm_version_groups(
    service: Arc<dyn DecisionService>,
    groups: Vec<Vec<InventoryRecord>>,
    concurrency: usize,
    attempts: usize,
) -> Result<Vec<Decision<VersionConfirmation>>, AppError> {
    if groups.is_empty() {
        return Ok(Vec::new());
    }

    let total = groups.len();
    let parallelism = concurrency.max(1).min(total);
    let semaphore = Arc::new(Semaphore::new(parallelism));
    let mut join_set: JoinSet<(usize, Decision<VersionConfirmation>)> = JoinSet::new();

    for (idx, members) in groups.into_iter().enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::General("decision worker pool closed".to_string()))?;
        let service = service.clone();

        join_set.spawn(async move {
            let _permit = permit;
            let decision = confirm_version_group(service.as_ref(), &members, attempts).await;
            (idx, decision)
        });
    }

    let mut results: Vec<Option<Decision<VersionConfirmation>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, decision)) => results[idx] = Some(decision),
            Err(err) => tracing::warn!(error = %err, "version confirmation task failed"),
        }
    }

    Ok(results
        .into_iter()
        .map(|r| r.unwrap_or(Decision::Unavailable))
        .collect())
}
