//! Shared helpers: tracing setup and output formatting.

use chrono::{DateTime, Local, Utc};
use tracing_subscriber::EnvFilter;

use strongroom_vault::{AuditEntry, PermissionGrant, SecretSummary, UserSummary};

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Shorten `text` to `max` characters, marking the cut with `~`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('~');
    out
}

pub fn secret_row(secret: &SecretSummary) -> String {
    format!(
        "{:>5}  {:<24}  {:<20}  {:<10}  {:<12}  {}",
        secret.id,
        truncate(&secret.title, 24),
        truncate(secret.login.as_deref().unwrap_or("-"), 20),
        truncate(&secret.category, 10),
        truncate(&secret.created_by, 12),
        format_time(secret.updated_at),
    )
}

pub fn secret_header() -> String {
    format!(
        "{:>5}  {:<24}  {:<20}  {:<10}  {:<12}  {}",
        "ID", "TITLE", "LOGIN", "CATEGORY", "OWNER", "UPDATED"
    )
}

pub fn secret_details(secret: &SecretSummary) -> Vec<String> {
    let mut lines = vec![
        format!("Title:      {}", secret.title),
        format!("Login:      {}", secret.login.as_deref().unwrap_or("-")),
        format!("URL:        {}", secret.url.as_deref().unwrap_or("-")),
        format!("Category:   {}", secret.category),
        format!("Visibility: {}", secret.visibility),
        format!("Owner:      {}", secret.created_by),
        format!("Created:    {}", format_time(secret.created_at)),
        format!("Updated:    {}", format_time(secret.updated_at)),
    ];
    if let Some(notes) = secret.notes.as_deref() {
        lines.push(format!("Notes:      {notes}"));
    }
    lines
}

pub fn history_row(entry: &AuditEntry) -> String {
    let change = match (entry.old_value.as_deref(), entry.new_value.as_deref()) {
        (Some(old), Some(new)) => format!("{old} -> {new}"),
        (Some(old), None) => old.to_string(),
        (None, Some(new)) => new.to_string(),
        (None, None) => String::new(),
    };
    format!(
        "{}  #{:<5} {:<16}  {:<12}  {}",
        format_time(entry.changed_at),
        entry.secret_id,
        entry.action.as_str(),
        entry.changed_by,
        change
    )
}

pub fn user_row(user: &UserSummary) -> String {
    let last_login = user
        .last_login
        .map(format_time)
        .unwrap_or_else(|| "never".to_string());
    let flag = if user.must_change_password {
        "  (password change pending)"
    } else {
        ""
    };
    format!(
        "{:<16}  {:<8}  created {}  last login {}{}",
        user.username,
        user.role.as_str(),
        format_time(user.created_at),
        last_login,
        flag
    )
}

pub fn grant_row(grant: &PermissionGrant) -> String {
    format!(
        "{:<16}  level {}  granted by {} at {}",
        grant.username,
        grant.level,
        grant.granted_by,
        format_time(grant.granted_at)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_text_unchanged() {
        assert_eq!(truncate("abc", 5), "abc");
    }

    #[test]
    fn truncate_long_text_marks_cut() {
        assert_eq!(truncate("abcdefgh", 5), "abcd~");
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate("ééééé", 5), "ééééé");
    }
}
