//! Read-only rendering of session history for export

use crate::session::{Role, Turn};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Render a conversation as a Markdown document.
///
/// Returns [`Error::NotFound`] when the session has no recorded turns, so
/// callers never serve an empty document.
pub fn render_markdown(session_key: &str, turns: &[Turn]) -> Result<String> {
    render_markdown_at(session_key, turns, Utc::now())
}

fn render_markdown_at(
    session_key: &str,
    turns: &[Turn],
    exported_at: DateTime<Utc>,
) -> Result<String> {
    if turns.is_empty() {
        return Err(Error::NotFound(format!(
            "no recorded turns for session '{}'",
            session_key
        )));
    }

    let mut out = String::new();
    out.push_str(&format!("# Conversation `{}`\n\n", session_key));
    out.push_str(&format!(
        "_Exported {} · {} turns_\n",
        exported_at.format("%Y-%m-%d %H:%M:%S UTC"),
        turns.len()
    ));

    for turn in turns {
        let heading = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        out.push_str(&format!(
            "\n## {} ({})\n\n",
            heading,
            turn.timestamp.format("%H:%M:%S")
        ));
        out.push_str(turn.content.trim_end());
        out.push('\n');
    }

    Ok(out)
}
