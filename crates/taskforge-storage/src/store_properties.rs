//! Property-based tests for store backends
//!
//! The filesystem store and the in-memory store must be observably
//! interchangeable: any sequence of writes, appends and removals leaves both
//! with the same document listing and contents.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::{DurableStore, FsStore, MemoryStore};

    #[derive(Debug, Clone)]
    enum Op {
        Write(String, String),
        Append(String, String),
        Remove(String),
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("state.json".to_string()),
            Just("tasks/index.json".to_string()),
            Just("tasks/auth/auth.login.md".to_string()),
            Just("tasks/setup/setup.init.md".to_string()),
            Just("logs/tasks.log".to_string()),
            Just("tasks".to_string()),
        ]
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (path_strategy(), "[a-z0-9 ]{0,16}").prop_map(|(p, c)| Op::Write(p, c)),
            (path_strategy(), "[a-z0-9 ]{0,16}").prop_map(|(p, c)| Op::Append(p, c)),
            path_strategy().prop_map(Op::Remove),
        ]
    }

    async fn apply(store: &dyn DurableStore, op: &Op) -> bool {
        match op {
            Op::Write(p, c) => store.write(p, c).await.is_ok(),
            Op::Append(p, c) => store.append(p, c).await.is_ok(),
            Op::Remove(p) => store.remove(p).await.is_ok(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_fs_and_memory_stores_agree(ops in prop::collection::vec(op_strategy(), 1..20)) {
            let dir = tempfile::tempdir().unwrap();
            let fs = FsStore::with_locking(dir.path(), false);
            let mem = MemoryStore::new();

            tokio_test::block_on(async {
                let mut ok_fs = Vec::new();
                let mut ok_mem = Vec::new();
                for op in &ops {
                    ok_fs.push(apply(&fs, op).await);
                    ok_mem.push(apply(&mem, op).await);
                }

                let fs_docs = fs.list("").await.unwrap();
                let mem_docs = mem.list("").await.unwrap();

                // A file and a directory cannot share a name on disk, so only
                // compare when both backends accepted every operation.
                if ok_fs.iter().all(|ok| *ok) && ok_mem.iter().all(|ok| *ok) {
                    assert_eq!(&fs_docs, &mem_docs);
                    for doc in &fs_docs {
                        assert_eq!(fs.read(doc).await.unwrap(), mem.read(doc).await.unwrap());
                    }
                }
            });
        }
    }
}
