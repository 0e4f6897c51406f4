use std::collections::VecDeque;

use async_trait::async_trait;
use replset_admin::{AdminError, CommandKind, ErrorCode, LogCursor, LogEntry};

/// Cursor over a snapshot of a mock log.
///
/// When `lose_position_after` is set the cursor fails with
/// `CappedPositionLost` once that many entries were returned, as a real
/// cursor does when capped eviction overtakes it.
#[derive(Debug)]
pub struct MockCursor {
    entries: VecDeque<LogEntry>,
    returned: usize,
    lose_position_after: Option<usize>,
}

impl MockCursor {
    pub const fn new(entries: VecDeque<LogEntry>, lose_position_after: Option<usize>) -> Self {
        Self {
            entries,
            returned: 0,
            lose_position_after,
        }
    }
}

#[async_trait]
impl LogCursor for MockCursor {
    async fn next_entry(&mut self) -> Result<Option<LogEntry>, AdminError> {
        if self.lose_position_after.is_some_and(|limit| self.returned >= limit) {
            return Err(AdminError::command(
                CommandKind::ReadLog,
                ErrorCode::CappedPositionLost,
                "CollectionScan died due to position in capped collection being deleted",
            ));
        }
        let entry = self.entries.pop_front();
        if entry.is_some() {
            self.returned += 1;
        }
        Ok(entry)
    }
}
