//! Usage: History page sized by the `history_load_limit` setting.

use crate::app_state::AppContext;
use crate::history::{self, HistoryRecord};
use crate::shared::error::AppResult;

/// Newest first, at most `settings.history_load_limit` entries.
pub async fn load_recent_history(ctx: &AppContext) -> AppResult<Vec<HistoryRecord>> {
    history::load_history(ctx.db(), ctx.settings().history_load_limit).await
}
