//! `history`: paginated scheduling-history search.

use slotgrid_core::SchedulingResult;
use slotgrid_state::{HistoryQuery, HistoryScope, StateStore};

pub fn run_history(
    store: &StateStore,
    scope: HistoryScope,
    scope_id: Option<String>,
    result: Option<SchedulingResult>,
    offset: usize,
    limit: usize,
) -> anyhow::Result<()> {
    let query = HistoryQuery {
        scope_id,
        result,
        offset,
        limit,
        ..HistoryQuery::new(scope)
    };
    let page = store.search_history(&query)?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}
