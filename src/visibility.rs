//! Visibility predicate: the sole authority for per-row snapshot visibility.
//!
//! Pure and side-effect free — no queries, no locking, just a decision over
//! a `RowVersion` and a transaction id, kept separate from the storage
//! layer so it can be unit tested in isolation and reused by every query
//! path that needs a visibility check.

/// A row version's six MVCC bookkeeping columns, as read from an
/// application table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowVersion {
    pub tx_min: i64,
    pub tx_max: i64,
    pub tx_min_committed: bool,
    pub tx_max_committed: bool,
    pub tx_min_rolled_back: bool,
    pub tx_max_rolled_back: bool,
}

/// Decide whether `version` is visible to a transaction with id `txn_id`.
pub fn is_visible(version: &RowVersion, txn_id: i64) -> bool {
    // Rule 1: not produced in the future relative to this snapshot, and
    // its creation wasn't rolled back.
    if version.tx_min > txn_id || version.tx_min_rolled_back {
        return false;
    }

    // Rule 2: a concurrent, not-yet-committed creator is invisible. Our
    // own writes (tx_min == txn_id) are exempt — we always see them.
    if version.tx_min < txn_id && !version.tx_min_committed {
        return false;
    }

    // Rule 3: not observably deleted by a committed predecessor.
    if version.tx_max < txn_id && version.tx_max_committed {
        return false;
    }

    // Rule 4: we ourselves deleted this version.
    if version.tx_max == txn_id {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(tx_min: i64, tx_max: i64) -> RowVersion {
        RowVersion {
            tx_min,
            tx_max,
            tx_min_committed: true,
            tx_max_committed: tx_max != 0,
            tx_min_rolled_back: false,
            tx_max_rolled_back: false,
        }
    }

    #[test]
    fn visible_current_version() {
        let version = v(3, 0);
        assert!(is_visible(&version, 5));
    }

    #[test]
    fn invisible_future_insert() {
        let version = v(10, 0);
        assert!(!is_visible(&version, 5));
    }

    #[test]
    fn invisible_rolled_back_insert() {
        let mut version = v(3, 0);
        version.tx_min_rolled_back = true;
        assert!(!is_visible(&version, 5));
    }

    #[test]
    fn invisible_uncommitted_concurrent_creator() {
        let mut version = v(4, 0);
        version.tx_min_committed = false;
        assert!(!is_visible(&version, 5));
    }

    #[test]
    fn own_uncommitted_write_is_visible() {
        let mut version = v(5, 0);
        version.tx_min_committed = false;
        assert!(is_visible(&version, 5));
    }

    #[test]
    fn invisible_after_committed_delete() {
        let version = v(2, 4);
        assert!(!is_visible(&version, 5));
    }

    #[test]
    fn visible_if_deleting_tx_not_committed() {
        let mut version = v(2, 4);
        version.tx_max_committed = false;
        assert!(is_visible(&version, 5));
    }

    #[test]
    fn invisible_if_deleted_by_self() {
        let version = v(2, 5);
        assert!(!is_visible(&version, 5));
    }

    #[test]
    fn visible_if_deleted_by_future_tx() {
        let version = v(2, 9);
        assert!(is_visible(&version, 5));
    }
}
