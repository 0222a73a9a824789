//! DDL helpers for application tables.
//!
//! The engine does not run migrations itself — callers own their own
//! migration tooling — but it does know what a versioned table needs, so
//! it hands back the DDL fragment rather than leaving every caller to
//! hand-copy the six MVCC columns correctly.

/// The six bookkeeping columns every versioned application table needs, in
/// the fixed order `insert`/`update`/`where_` bind them in.
pub const MVCC_COLUMNS: &str = "\
    tx_min BIGINT NOT NULL, \
    tx_max BIGINT NOT NULL DEFAULT 0, \
    tx_min_committed BOOLEAN NOT NULL DEFAULT FALSE, \
    tx_max_committed BOOLEAN NOT NULL DEFAULT FALSE, \
    tx_min_rolled_back BOOLEAN NOT NULL DEFAULT FALSE, \
    tx_max_rolled_back BOOLEAN NOT NULL DEFAULT FALSE";

/// Build a `CREATE TABLE` statement for a new versioned application table:
/// a `<table>_id_seq` sequence for the stable logical id, the six MVCC
/// columns, `extra_columns` verbatim (e.g. `"name TEXT NOT NULL"`), and a
/// composite `(id, tx_min)` primary key since a logical row's identity
/// spans every version of it.
pub fn ensure_versioned_table(table: &str, extra_columns: &[&str]) -> String {
    let mut columns = vec![
        "id BIGINT NOT NULL".to_string(),
        MVCC_COLUMNS.to_string(),
    ];
    columns.extend(extra_columns.iter().map(|c| c.to_string()));

    format!(
        "CREATE SEQUENCE IF NOT EXISTS {table}_id_seq;\n\
         CREATE TABLE IF NOT EXISTS {table} (\n    {},\n    PRIMARY KEY (id, tx_min)\n);",
        columns.join(",\n    ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_sequence_and_table() {
        let ddl = ensure_versioned_table("widgets", &["name TEXT NOT NULL"]);
        assert!(ddl.contains("CREATE SEQUENCE IF NOT EXISTS widgets_id_seq"));
        assert!(ddl.contains("PRIMARY KEY (id, tx_min)"));
        assert!(ddl.contains("name TEXT NOT NULL"));
    }
}
