//! Property-based tests for parameter maps and batch queries
//!
//! These tests verify through property-based testing that:
//! - Merging parameter maps never overwrites a key already present
//! - `query` agrees with `query_single` applied row by row
//! - Text and integer values survive a write/read round trip

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::collections::HashMap;

    use sqlbatch::core::db::{
        Batch, ConnectionOptions, DbConnection, ExecutionErrorPolicy, ParamValue, Params,
        TransactionBehavior,
    };
    use sqlbatch::db_params;

    // Test infrastructure

    fn memory_batch() -> Batch {
        let mut batch = DbConnection::new(ConnectionOptions::memory())
            .new_batch(TransactionBehavior::Deferred, ExecutionErrorPolicy::CallerDecides)
            .unwrap();
        batch
            .exec_script("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, n INTEGER);")
            .unwrap();
        batch
    }

    fn arb_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,7}"
    }

    fn arb_value() -> impl Strategy<Value = ParamValue> {
        prop_oneof![
            Just(ParamValue::Null),
            any::<i64>().prop_map(ParamValue::Int64),
            any::<bool>().prop_map(ParamValue::Bool),
            "[ -~]{0,16}".prop_map(ParamValue::Text),
        ]
    }

    fn arb_params() -> impl Strategy<Value = Params> {
        prop::collection::hash_map(arb_name(), arb_value(), 0..8)
            .prop_map(|map: HashMap<String, ParamValue>| map.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn merge_never_overwrites(left in arb_params(), right in arb_params()) {
            let merged = left.clone().merge(&right);

            for (name, value) in &left {
                prop_assert_eq!(merged.get(name), Some(value));
            }
            for (name, value) in &right {
                if !left.contains(name) {
                    prop_assert_eq!(merged.get(name), Some(value));
                }
            }
            let expected = left.len() + right.iter().filter(|(n, _)| !left.contains(n)).count();
            prop_assert_eq!(merged.len(), expected);
        }

        #[test]
        fn with_keeps_first_value(name in arb_name(), first in arb_value(), second in arb_value()) {
            let params = Params::single(name.clone(), first.clone()).with(name.clone(), second);
            prop_assert_eq!(params.get(&name), Some(&first));
            prop_assert_eq!(params.len(), 1);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn query_matches_query_single_per_row(
            rows in prop::collection::vec(("[ -~]{0,12}", any::<i32>()), 0..12)
        ) {
            let mut batch = memory_batch();
            batch.exec_many(
                "INSERT INTO items (label, n) VALUES (@label, @n)",
                rows.iter().map(|(label, n)| db_params! { "label" => label.as_str(), "n" => *n }),
            ).unwrap();

            let all = batch.query(
                "SELECT label, n FROM items ORDER BY id",
                Params::new(),
                |r| Ok((r.read_string("label")?, r.read_i32("n")?)),
            ).unwrap();

            let mut one_by_one = Vec::new();
            for offset in 0..all.len() as i64 {
                let row = batch.query_single(
                    "SELECT label, n FROM items ORDER BY id LIMIT 1 OFFSET @offset",
                    db_params! { "offset" => offset },
                    |r| Ok((r.read_string("label")?, r.read_i32("n")?)),
                ).unwrap();
                one_by_one.push(row.unwrap());
            }

            prop_assert_eq!(&all, &rows);
            prop_assert_eq!(all, one_by_one);
            batch.rollback().unwrap();
        }

        #[test]
        fn scalar_round_trips_values(text in "[ -~]{0,32}", number in any::<i64>()) {
            let mut batch = memory_batch();
            let echoed = batch.scalar("SELECT @v", db_params! { "v" => text.as_str() }).unwrap();
            prop_assert_eq!(echoed, Some(rusqlite::types::Value::Text(text)));

            let echoed = batch.scalar("SELECT @v", db_params! { "v" => number }).unwrap();
            prop_assert_eq!(echoed, Some(rusqlite::types::Value::Integer(number)));
            batch.rollback().unwrap();
        }
    }
}
