#![forbid(unsafe_code)]

//! Property tests for [`MemoryModel`] bookkeeping.
//!
//! Validates:
//! - `value` always reflects the latest `set` or `push_remote`.
//! - `dirty_fields` is exactly the set of fields `set` since the last flush.
//! - `persisted` changes only on `flush` (dirty fields) or `push_remote`.
//! - `flush_count` counts every flush.

use std::collections::{BTreeSet, HashMap};

use nbsync_core::RemoteModelHandle;
use nbsync_harness::MemoryModel;
use proptest::prelude::*;
use serde_json::{Value, json};

const FIELDS: [&str; 3] = ["zoom", "center", "visualization"];

#[derive(Debug, Clone)]
enum Op {
    Set(usize, i64),
    Push(usize, i64),
    Flush,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..FIELDS.len(), -3_i64..3).prop_map(|(f, v)| Op::Set(f, v)),
        1 => (0..FIELDS.len(), -3_i64..3).prop_map(|(f, v)| Op::Push(f, v)),
        1 => Just(Op::Flush),
    ]
}

#[derive(Default)]
struct Expected {
    values: HashMap<&'static str, Value>,
    persisted: HashMap<&'static str, Value>,
    dirty: BTreeSet<&'static str>,
    flushes: usize,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn bookkeeping_matches_reference(ops in prop::collection::vec(op(), 0..40)) {
        let model = MemoryModel::new();
        let mut expected = Expected::default();

        for op in ops {
            match op {
                Op::Set(f, v) => {
                    model.set(FIELDS[f], json!(v)).unwrap();
                    expected.values.insert(FIELDS[f], json!(v));
                    expected.dirty.insert(FIELDS[f]);
                }
                Op::Push(f, v) => {
                    model.push_remote(FIELDS[f], json!(v));
                    expected.values.insert(FIELDS[f], json!(v));
                    expected.persisted.insert(FIELDS[f], json!(v));
                }
                Op::Flush => {
                    model.flush().unwrap();
                    for field in std::mem::take(&mut expected.dirty) {
                        if let Some(value) = expected.values.get(field) {
                            expected.persisted.insert(field, value.clone());
                        }
                    }
                    expected.flushes += 1;
                }
            }

            let dirty: BTreeSet<String> = model.dirty_fields().into_iter().collect();
            let want: BTreeSet<String> = expected.dirty.iter().map(|f| f.to_string()).collect();
            prop_assert_eq!(dirty, want);
            for field in FIELDS {
                prop_assert_eq!(model.value(field), expected.values.get(field).cloned());
                prop_assert_eq!(model.persisted(field), expected.persisted.get(field).cloned());
            }
            prop_assert_eq!(model.flush_count(), expected.flushes);
        }
    }
}
