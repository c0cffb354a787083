//! Property-based tests for next-task selection

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use crate::index::{IndexEntry, IndexMetadata, TaskIndex};
    use crate::models::TaskStatus;
    use crate::scheduler::{select, Selection};

    fn status_strategy() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            3 => Just(TaskStatus::Pending),
            1 => Just(TaskStatus::InProgress),
            2 => Just(TaskStatus::Completed),
            1 => Just(TaskStatus::Failed),
            1 => Just(TaskStatus::Blocked),
        ]
    }

    /// Up to 12 tasks `t0..tN`; dependencies may point anywhere, including
    /// unknown ids and forward references
    fn index_strategy() -> impl Strategy<Value = TaskIndex> {
        prop::collection::vec(
            (0i64..4, status_strategy(), prop::collection::vec(0usize..14, 0..3)),
            0..12,
        )
        .prop_map(|tasks| {
            let mut index = TaskIndex::new(IndexMetadata::default(), Utc::now());
            for (i, (priority, status, deps)) in tasks.into_iter().enumerate() {
                let mut dependencies: Vec<String> = deps.iter().map(|d| format!("t{}", d)).collect();
                dependencies.sort();
                dependencies.dedup();
                index.upsert(
                    &format!("t{}", i),
                    IndexEntry {
                        status,
                        priority,
                        module: "m".into(),
                        description: "d".into(),
                        file_path: format!("tasks/m/t{}.md", i),
                        dependencies,
                    },
                );
            }
            index
        })
    }

    fn ready_ids(index: &TaskIndex) -> Vec<(String, i64)> {
        index
            .entries()
            .filter(|(_, e)| {
                e.status == TaskStatus::Pending
                    && e.dependencies
                        .iter()
                        .all(|d| index.status_of(d) == Some(TaskStatus::Completed))
            })
            .map(|(id, e)| (id.to_string(), e.priority))
            .collect()
    }

    proptest! {
        #[test]
        fn prop_selected_task_has_completed_dependencies(index in index_strategy()) {
            if let Selection::Ready(id) = select(&index) {
                let entry = index.get(&id).unwrap();
                prop_assert_eq!(entry.status, TaskStatus::Pending);
                for dep in &entry.dependencies {
                    prop_assert_eq!(index.status_of(dep), Some(TaskStatus::Completed));
                }
            }
        }

        #[test]
        fn prop_selection_is_first_lowest_priority(index in index_strategy()) {
            let ready = ready_ids(&index);
            match select(&index) {
                Selection::Ready(id) => {
                    let min = ready.iter().map(|(_, p)| *p).min().unwrap();
                    let expected = ready.iter().find(|(_, p)| *p == min).unwrap();
                    prop_assert_eq!(&id, &expected.0);
                }
                other => {
                    prop_assert!(ready.is_empty(), "ready tasks exist but got {:?}", other);
                }
            }
        }

        #[test]
        fn prop_no_ready_task_is_explained(index in index_strategy()) {
            let has_pending = index.entries().any(|(_, e)| e.status == TaskStatus::Pending);
            match select(&index) {
                Selection::Exhausted => prop_assert!(!has_pending),
                Selection::Waiting(pending) => {
                    prop_assert!(!pending.is_empty());
                    for id in &pending {
                        prop_assert_eq!(index.status_of(id), Some(TaskStatus::Pending));
                    }
                }
                Selection::Blocked(cycle) => {
                    prop_assert!(cycle.len() >= 2);
                    prop_assert_eq!(cycle.first(), cycle.last());
                    for id in &cycle {
                        prop_assert_eq!(index.status_of(id), Some(TaskStatus::Pending));
                    }
                }
                Selection::Ready(_) => {}
            }
        }
    }
}
