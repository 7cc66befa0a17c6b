use std::path::{Path, PathBuf};

pub const SESSION_DIR: [&str; 2] = [".agent", "sessions"];
pub const SESSION_FILE_EXTENSION: &str = "jsonl";

#[must_use]
pub fn session_root(cwd: &Path) -> PathBuf {
    cwd.join(SESSION_DIR[0]).join(SESSION_DIR[1])
}

#[must_use]
pub fn sanitize_for_filename(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' | '_' => '-',
            _ => c,
        })
        .collect()
}

/// `<created_at>_<conversation_id>.jsonl`, both parts filesystem-safe.
///
/// Underscores are replaced in both parts so the separator stays unambiguous.
#[must_use]
pub fn session_file_name(created_at: &str, conversation_id: &str) -> String {
    format!(
        "{}_{}.{SESSION_FILE_EXTENSION}",
        sanitize_for_filename(created_at),
        sanitize_for_filename(conversation_id)
    )
}

/// Returns true when `file_name` was produced for `conversation_id`.
#[must_use]
pub fn is_session_file_for(file_name: &str, conversation_id: &str) -> bool {
    let suffix = format!(
        "_{}.{SESSION_FILE_EXTENSION}",
        sanitize_for_filename(conversation_id)
    );
    file_name.ends_with(&suffix)
}
