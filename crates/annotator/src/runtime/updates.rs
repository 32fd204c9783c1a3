//! `<codex_updates>` payload parsing.
//!
//! Besides tool calls, the model may batch glossary mutations into its
//! final message as a tagged block. Malformed elements are logged and
//! skipped; a bad payload never halts the scene.

use qc_domain::glossary::EntryStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum CodexUpdate {
    Create {
        term: String,
        definition: String,
        tags: Vec<String>,
        status: Option<EntryStatus>,
    },
    Update {
        entry_id: i64,
        field: UpdateField,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateField {
    Term,
    Definition,
    Status,
    Tags,
}

impl UpdateField {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "term" => Some(UpdateField::Term),
            "definition" => Some(UpdateField::Definition),
            "status" => Some(UpdateField::Status),
            "tags" => Some(UpdateField::Tags),
            _ => None,
        }
    }
}

/// Extract every well-formed update from the message. Returns the
/// parsed updates; malformed elements are warned about and dropped.
pub fn parse_codex_updates(text: &str) -> Vec<CodexUpdate> {
    let block_re = regex::Regex::new(r"(?s)<codex_updates>(.*?)</codex_updates>")
        .expect("static regex");
    let create_re = regex::Regex::new(
        r#"(?s)<create\s+term="([^"]*)"(?:\s+tags="([^"]*)")?(?:\s+status="([^"]*)")?\s*>(.*?)</create>"#,
    )
    .expect("static regex");
    let update_re = regex::Regex::new(
        r#"(?s)<update\s+entry_id="([^"]*)"\s+field="([^"]*)"\s*>(.*?)</update>"#,
    )
    .expect("static regex");

    let mut updates = Vec::new();
    for block in block_re.captures_iter(text) {
        let body = &block[1];

        for cap in create_re.captures_iter(body) {
            let term = cap[1].trim().to_string();
            if term.is_empty() {
                tracing::warn!("codex_updates: <create> with empty term skipped");
                continue;
            }
            let status = match cap.get(3).map(|m| m.as_str()) {
                None | Some("") => None,
                Some(raw) => match EntryStatus::parse(raw) {
                    Some(s) => Some(s),
                    None => {
                        tracing::warn!(status = raw, "codex_updates: unknown status skipped");
                        continue;
                    }
                },
            };
            updates.push(CodexUpdate::Create {
                term,
                definition: cap[4].trim().to_string(),
                tags: split_tags(cap.get(2).map(|m| m.as_str()).unwrap_or("")),
                status,
            });
        }

        for cap in update_re.captures_iter(body) {
            let entry_id = match cap[1].trim().parse::<i64>() {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!(raw = &cap[1], "codex_updates: bad entry_id skipped");
                    continue;
                }
            };
            let field = match UpdateField::parse(cap[2].trim()) {
                Some(f) => f,
                None => {
                    tracing::warn!(raw = &cap[2], "codex_updates: unknown field skipped");
                    continue;
                }
            };
            updates.push(CodexUpdate::Update {
                entry_id,
                field,
                value: cap[3].trim().to_string(),
            });
        }
    }
    updates
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
