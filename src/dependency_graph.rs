//! Dependency graph: append-only hierarchical path store recording
//! `tx_i depends on tx_j`, used for both wait-for tracking and cycle
//! detection.
//!
//! Each edge is stored as a Postgres `ltree` path
//! (`root.dependencies.tx_<waiter>.tx_<holder>`), one row per edge. Edges
//! from different transactions are siblings under `root.dependencies`, not
//! nested inside one another, so a multi-hop wait chain can't be found by
//! `ltree` containment alone (`path <@ path`) — the recursive query below
//! instead reads the waiter/holder labels back out of each path and walks
//! the chain by matching a row's waiter label against the previous row's
//! holder label, treating `paths` as a plain edge list.

use crate::error::{Error, Result};
use sqlx::PgPool;
use tracing::{debug, instrument};

/// Record that `waiter` is blocked waiting on a resource currently held by
/// `holder`, then run cycle detection rooted at `waiter`.
///
/// On success, the dependency path is left in place (callers on the same
/// resource list will see it). On cycle, all dependency/lock paths owned by
/// `waiter` are removed and `Error::DependencyCycle` is returned — the
/// caller must roll back.
#[instrument(level = "debug", skip(pool))]
pub async fn add_dependency_and_check(pool: &PgPool, waiter: i64, holder: i64) -> Result<()> {
    let path = format!("root.dependencies.tx_{waiter}.tx_{holder}");
    sqlx::query(
        "INSERT INTO paths (path, type, name, dependency_type)
         VALUES (text2ltree($1), 'dependency', $2, 'target')",
    )
    .bind(&path)
    .bind(format!("tx_{holder}"))
    .execute(pool)
    .await
    .map_err(Error::LockBackendFailure)?;

    if has_cycle(pool, waiter).await? {
        debug!(waiter, holder, "dependency cycle detected, aborting waiter");
        cleanup(pool, waiter).await?;
        return Err(Error::DependencyCycle { txn_id: waiter });
    }

    Ok(())
}

/// Record that `owner` now holds a lock on `(table, id)`, for bookkeeping.
/// Does not itself run cycle detection — only waiting
/// (`add_dependency_and_check`) can introduce a cycle.
pub async fn add_lock_path(pool: &PgPool, owner: i64, table: &str, id: i64) -> Result<()> {
    let path = format!("root.locks.tx_{owner}.{table}_{id}");
    sqlx::query(
        "INSERT INTO paths (path, type, name, dependency_type)
         VALUES (text2ltree($1), 'lock', $2, 'source')",
    )
    .bind(&path)
    .bind(format!("{table}_{id}"))
    .execute(pool)
    .await
    .map_err(Error::LockBackendFailure)?;
    Ok(())
}

/// Walk the wait-for chain starting at `txn_id` and report whether it
/// leads back to `txn_id` itself, i.e. whether `txn_id` is waiting
/// (directly or transitively) on a transaction that is in turn waiting on
/// it. Each step follows one edge (`tx_<waiter>.tx_<holder>`) to the next
/// by label, not by `ltree` nesting, since edges aren't stored nested.
///
/// Recursion is capped one hop past the active-transaction count purely
/// for termination: an acyclic wait-for chain among N active transactions
/// can't exceed N-1 hops, so the cap can never cut off a chain before the
/// cycle check below would have found a real cycle.
pub async fn has_cycle(pool: &PgPool, txn_id: i64) -> Result<bool> {
    let label = format!("tx_{txn_id}");
    let row: (bool,) = sqlx::query_as(
        r#"
        WITH RECURSIVE dependency_chain AS (
            SELECT
                subpath(path, 2, 1)::text AS waiter,
                subpath(path, 3, 1)::text AS holder,
                1 AS depth
            FROM paths
            WHERE dependency_type = 'target'
            AND subpath(path, 2, 1)::text = $1

            UNION ALL

            SELECT
                subpath(p.path, 2, 1)::text,
                subpath(p.path, 3, 1)::text,
                dc.depth + 1
            FROM paths p
            JOIN dependency_chain dc ON subpath(p.path, 2, 1)::text = dc.holder
            WHERE p.dependency_type = 'target'
            AND dc.depth <= (SELECT COUNT(DISTINCT id) FROM transactions WHERE status = 'active') + 1
        )
        SELECT EXISTS (
            SELECT 1 FROM dependency_chain WHERE holder = $1
        )
        "#,
    )
    .bind(&label)
    .fetch_one(pool)
    .await
    .map_err(Error::LockBackendFailure)?;

    Ok(row.0)
}

/// Remove every dependency and lock path owned by `txn_id`. Called both on
/// cycle abort and on transaction termination (commit/rollback).
pub async fn cleanup(pool: &PgPool, txn_id: i64) -> Result<()> {
    sqlx::query(
        "DELETE FROM paths
         WHERE path <@ text2ltree($1)
         OR path <@ text2ltree($2)",
    )
    .bind(format!("root.dependencies.tx_{txn_id}"))
    .bind(format!("root.locks.tx_{txn_id}"))
    .execute(pool)
    .await
    .map_err(Error::LockBackendFailure)?;
    Ok(())
}

/// Pure re-implementation of `has_cycle` over an in-memory edge list, used
/// for unit testing without a database. Edges are `(from, to)` meaning
/// "from depends on to". Mirrors `has_cycle` exactly: follows edges from
/// `root` and reports whether the chain ever leads back to `root`, using a
/// visited set (rather than `has_cycle`'s active-transaction-count cap) to
/// bound the walk, since an in-memory graph has no notion of active
/// transaction count to borrow a cap from.
pub fn has_cycle_pure(edges: &[(i64, i64)], root: i64) -> bool {
    fn reaches_root(edges: &[(i64, i64)], node: i64, root: i64, visited: &mut Vec<i64>) -> bool {
        if visited.contains(&node) {
            return false;
        }
        visited.push(node);
        for &(from, to) in edges {
            if from == node {
                if to == root {
                    return true;
                }
                if reaches_root(edges, to, root, visited) {
                    return true;
                }
            }
        }
        false
    }

    let mut visited = Vec::new();
    reaches_root(edges, root, root, &mut visited)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acyclic_chain_no_cycle() {
        // 1 -> 2 -> 3: never leads back to 1.
        let edges = [(1, 2), (2, 3)];
        assert!(!has_cycle_pure(&edges, 1));
    }

    #[test]
    fn two_party_cycle_detected() {
        // 1 -> 2 -> 1: a direct mutual wait.
        let edges = [(1, 2), (2, 1)];
        assert!(has_cycle_pure(&edges, 1));
        assert!(has_cycle_pure(&edges, 2));
    }

    #[test]
    fn longer_cycle_detected() {
        // 1 -> 2 -> 3 -> 1.
        let edges = [(1, 2), (2, 3), (3, 1)];
        assert!(has_cycle_pure(&edges, 1));
    }

    #[test]
    fn single_wait_no_cycle() {
        let edges = [(1, 2)];
        assert!(!has_cycle_pure(&edges, 1));
    }

    #[test]
    fn cycle_elsewhere_does_not_affect_unrelated_root() {
        // 2 -> 3 -> 2 cycles, but 1 only waits on 2 and isn't part of it.
        let edges = [(1, 2), (2, 3), (3, 2)];
        assert!(!has_cycle_pure(&edges, 1));
    }
}
