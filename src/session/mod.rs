mod context;
mod convert;
mod error;
mod pin;
mod state;

pub use context::{CloseHandle, QueryContext};
pub use error::QueryError;
pub use state::SessionState;

use std::borrow::Cow;

/// Truncate SQL for logging (avoid huge log entries)
///
/// Uses Cow to avoid allocation when truncation is not needed.
fn truncate_sql(sql: &str, max_chars: usize) -> Cow<'_, str> {
    match sql.char_indices().nth(max_chars) {
        None => Cow::Borrowed(sql),
        Some((idx, _)) => Cow::Owned(format!("{}...", &sql[..idx])),
    }
}
