//! In-memory tables shared by the planner tests

use crate::sources::SqliteEngine;

/// Engine with `sql` already executed
pub(crate) fn engine_with(sql: &str) -> SqliteEngine {
    let engine = SqliteEngine::open_in_memory().unwrap();
    engine.execute_batch(sql).unwrap();
    engine
}

/// Table `t` with a REAL column `v` holding `0..n` and an even/odd `tag`
pub(crate) fn sequence_table(n: usize) -> SqliteEngine {
    let mut sql = String::from("CREATE TABLE t (v REAL, tag TEXT);");
    for i in 0..n {
        let tag = if i % 2 == 0 { "even" } else { "odd" };
        sql.push_str(&format!("INSERT INTO t VALUES ({}, '{}');", i, tag));
    }
    engine_with(&sql)
}

/// Table `e` with a TEXT column `ts`, one row per given instant literal
pub(crate) fn instants_table(instants: &[Option<&str>]) -> SqliteEngine {
    let mut sql = String::from("CREATE TABLE e (ts TEXT);");
    for instant in instants {
        match instant {
            Some(text) => sql.push_str(&format!("INSERT INTO e VALUES ('{}');", text)),
            None => sql.push_str("INSERT INTO e VALUES (NULL);"),
        }
    }
    engine_with(&sql)
}
