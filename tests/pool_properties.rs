// tests/pool_properties.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use simplequeue::mailbox::{keys, Mailbox, MemoryMailbox};
use simplequeue::pool::{Acquired, EnginePool};
use simplequeue::stream::TaskStream;
use simplequeue::types::Engine;
use simplequeue_test_utils::builders::TaskFileBuilder;

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    /// Release the n-th active engine (modulo the active count).
    Release { nth: usize, completed: bool },
    Shutdown,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Acquire),
        4 => (any::<usize>(), any::<bool>()).prop_map(|(nth, completed)| Op::Release { nth, completed }),
        1 => Just(Op::Shutdown),
    ]
}

proptest! {
    #[test]
    fn pool_never_double_assigns_engines(
        engine_count in 1usize..5,
        ops in proptest::collection::vec(op_strategy(), 1..60),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let path = TaskFileBuilder::new().task("echo x").write_to(dir.path(), "tasks.txt");
            let stream = TaskStream::open(&path).await.unwrap();

            let memory = Arc::new(MemoryMailbox::new());
            let mailbox: Arc<dyn Mailbox> = memory.clone();
            let engines: Vec<Engine> = (0..engine_count)
                .map(|i| Engine::new(i.to_string(), "node"))
                .collect();
            let members: BTreeSet<String> = engines.iter().map(|e| e.id.clone()).collect();
            let pool = EnginePool::with_engines(mailbox, engines, vec![]);

            let mut next_index = 0u64;
            let mut shut_down = false;

            for op in ops {
                match op {
                    Op::Acquire => {
                        let snapshot = pool.snapshot();
                        // Only acquire when it cannot block.
                        if snapshot.idle.is_empty() && !snapshot.sentinel_queued {
                            continue;
                        }
                        match pool.get_engine(next_index).await {
                            Acquired::Engine(engine) => {
                                prop_assert!(!shut_down);
                                prop_assert!(members.contains(&engine.id));
                            }
                            Acquired::Shutdown => prop_assert!(shut_down),
                        }
                        next_index += 1;
                    }
                    Op::Release { nth, completed } => {
                        let active: Vec<_> = pool.snapshot().active.into_iter().collect();
                        if active.is_empty() {
                            continue;
                        }
                        let (id, index) = &active[nth % active.len()];
                        pool.release_engine(id, &stream, *index, completed);
                    }
                    Op::Shutdown => {
                        pool.shutdown().await;
                        shut_down = true;
                    }
                }

                let snapshot = pool.snapshot();
                let idle: BTreeSet<_> = snapshot.idle.iter().cloned().collect();
                let active: BTreeSet<_> = snapshot.active.keys().cloned().collect();

                // No engine is queued twice or both idle and active.
                prop_assert_eq!(idle.len(), snapshot.idle.len());
                prop_assert!(idle.is_disjoint(&active));
                prop_assert!(idle.is_subset(&members));
                prop_assert!(active.is_subset(&members));

                if shut_down {
                    prop_assert!(idle.is_empty());
                    prop_assert!(snapshot.sentinel_queued);
                } else {
                    prop_assert_eq!(idle.len() + active.len(), members.len());
                }
            }

            // However often shutdown ran, each engine got at most one bye.
            for id in &members {
                let expected = usize::from(shut_down);
                prop_assert_eq!(memory.queued(&keys::engine_task(id)), expected);
            }
            Ok(())
        })?;
    }
}
