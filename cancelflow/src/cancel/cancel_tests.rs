//! Multi-thread scenario tests for the cancellation module.

#[cfg(test)]
mod tests {
    use crate::cancel::CancellationManager;
    use pretty_assertions::assert_eq;
    use rand::Rng;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_sweep_runs_each_callback_exactly_once() {
        let manager = CancellationManager::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let token = manager.issue_token();
            let count_clone = count.clone();
            let registered = manager.register_callback(token, move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            });
            assert!(registered);
        }

        manager.start_cancel();
        manager.start_cancel();

        assert_eq!(count.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_root_cancel_scenario() {
        let manager = CancellationManager::new();
        let token = manager.issue_token();
        let flag = Arc::new(AtomicBool::new(false));

        let flag_clone = flag.clone();
        let registered = manager.register_callback(token, move || {
            flag_clone.store(true, Ordering::SeqCst);
        });
        assert!(registered);

        manager.start_cancel();

        assert!(flag.load(Ordering::SeqCst));
        let late = manager.issue_token();
        assert!(!manager.register_callback(late, || {}));
        assert!(!manager.deregister_callback(token));
    }

    #[test]
    fn test_register_from_within_callback_fails() {
        let manager = Arc::new(CancellationManager::new());
        let token = manager.issue_token();
        let rejected = Arc::new(AtomicBool::new(false));

        let manager_clone = manager.clone();
        let rejected_clone = rejected.clone();
        let registered = manager.register_callback(token, move || {
            let nested = manager_clone.issue_token();
            if !manager_clone.register_callback(nested, || {}) {
                rejected_clone.store(true, Ordering::SeqCst);
            }
        });
        assert!(registered);

        manager.start_cancel();
        assert!(rejected.load(Ordering::SeqCst));
    }

    #[test]
    fn test_nested_start_cancel_is_noop() {
        let manager = Arc::new(CancellationManager::new());
        let token = manager.issue_token();
        let count = Arc::new(AtomicUsize::new(0));

        let manager_clone = manager.clone();
        let count_clone = count.clone();
        let registered = manager.register_callback(token, move || {
            manager_clone.start_cancel();
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registered);

        manager.start_cancel();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(manager.is_cancelled());
    }

    #[test]
    fn test_try_deregister_from_within_callback_does_not_block() {
        let manager = Arc::new(CancellationManager::new());
        let first = manager.issue_token();
        let second = manager.issue_token();
        let observed_false = Arc::new(AtomicBool::new(false));

        let manager_clone = manager.clone();
        let observed_clone = observed_false.clone();
        let registered = manager.register_callback(first, move || {
            if !manager_clone.try_deregister_callback(second) {
                observed_clone.store(true, Ordering::SeqCst);
            }
        });
        assert!(registered);
        let registered = manager.register_callback(second, || {});
        assert!(registered);

        manager.start_cancel();
        assert!(observed_false.load(Ordering::SeqCst));
    }

    #[test]
    fn test_deregister_waits_for_inflight_sweep() {
        let manager = Arc::new(CancellationManager::new());
        let token = manager.issue_token();
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let entered_clone = entered.clone();
        let finished_clone = finished.clone();
        let registered = manager.register_callback(token, move || {
            entered_clone.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            finished_clone.store(true, Ordering::SeqCst);
        });
        assert!(registered);

        let canceller = {
            let manager = manager.clone();
            thread::spawn(move || manager.start_cancel())
        };

        while !entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        // The sweep is mid-callback; deregistration must not return until
        // the callback has finished.
        let removed = manager.deregister_callback(token);
        assert!(!removed);
        assert!(finished.load(Ordering::SeqCst));

        canceller.join().unwrap();
    }

    #[test]
    fn test_deregister_race_has_exactly_one_outcome() {
        for _ in 0..100 {
            let manager = Arc::new(CancellationManager::new());
            let token = manager.issue_token();
            let ran = Arc::new(AtomicBool::new(false));

            let ran_clone = ran.clone();
            let registered = manager.register_callback(token, move || {
                ran_clone.store(true, Ordering::SeqCst);
            });
            assert!(registered);

            let canceller = {
                let manager = manager.clone();
                thread::spawn(move || manager.start_cancel())
            };

            let jitter = rand::thread_rng().gen_range(0..50u64);
            thread::sleep(Duration::from_micros(jitter));
            let removed = manager.deregister_callback(token);

            canceller.join().unwrap();

            // Either the callback ran, or it was removed first. Never both,
            // never neither.
            assert_ne!(removed, ran.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn test_callback_effects_visible_once_cancelled() {
        let manager = Arc::new(CancellationManager::new());
        let token = manager.issue_token();
        let value = Arc::new(AtomicUsize::new(0));

        let value_clone = value.clone();
        let registered = manager.register_callback(token, move || {
            value_clone.store(42, Ordering::Relaxed);
        });
        assert!(registered);

        let canceller = {
            let manager = manager.clone();
            thread::spawn(move || manager.start_cancel())
        };

        while !manager.is_cancelled() {
            thread::yield_now();
        }
        // The acquire load of the cancelled flag orders the callback's
        // relaxed write before this read.
        assert_eq!(value.load(Ordering::Relaxed), 42);

        canceller.join().unwrap();
    }

    #[test]
    fn test_parent_cancel_cascades_to_child() {
        let parent = CancellationManager::new();
        let child = parent.child();

        let token = child.issue_token();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let registered = child.register_callback(token, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registered);

        parent.start_cancel();

        assert!(child.is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cascade_reaches_grandchildren() {
        let root = CancellationManager::new();
        let child = root.child();
        let grandchild = child.child();

        root.start_cancel();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_each_child_cancelled_exactly_once() {
        let parent = CancellationManager::new();
        let count = Arc::new(AtomicUsize::new(0));

        let children: Vec<_> = (0..4)
            .map(|_| {
                let child = parent.child();
                let token = child.issue_token();
                let count_clone = count.clone();
                let registered = child.register_callback(token, move || {
                    count_clone.fetch_add(1, Ordering::SeqCst);
                });
                assert!(registered);
                child
            })
            .collect();

        parent.start_cancel();
        parent.start_cancel();

        assert_eq!(count.load(Ordering::SeqCst), 4);
        for child in &children {
            assert!(child.is_cancelled());
        }
    }

    #[test]
    fn test_child_of_cancelled_parent_born_cancelled() {
        let parent = CancellationManager::new();
        parent.start_cancel();

        let child = parent.child();
        assert!(child.is_cancelled());
        assert!(!child.is_cancelling());

        let token = child.issue_token();
        assert!(!child.register_callback(token, || {
            panic!("must never run");
        }));
    }

    #[test]
    fn test_dropped_child_does_not_receive_cascade() {
        let parent = CancellationManager::new();
        let count = Arc::new(AtomicUsize::new(0));

        {
            let child = parent.child();
            let token = child.issue_token();
            let count_clone = count.clone();
            let registered = child.register_callback(token, move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            });
            assert!(registered);
            assert!(child.deregister_callback(token));
        }

        parent.start_cancel();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_with_pending_callbacks_forces_sweep() {
        let count = Arc::new(AtomicUsize::new(0));

        {
            let manager = CancellationManager::new();
            let token = manager.issue_token();
            let count_clone = count.clone();
            let registered = manager.register_callback(token, move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            });
            assert!(registered);
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_children_under_cancelling_parent() {
        // Building children while the parent cancels must leave every child
        // cancelled, whether it caught the cascade or was born cancelled.
        for _ in 0..20 {
            let parent = Arc::new(CancellationManager::new());

            let builder = {
                let parent = parent.clone();
                thread::spawn(move || (0..8).map(|_| parent.child()).collect::<Vec<_>>())
            };
            let canceller = {
                let parent = parent.clone();
                thread::spawn(move || parent.start_cancel())
            };

            let children = builder.join().unwrap();
            canceller.join().unwrap();

            for child in &children {
                assert!(child.is_cancelled());
            }
        }
    }

    #[test]
    fn test_panicking_callback_does_not_stop_sweep() {
        let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

        let manager = CancellationManager::new();
        let panicking = manager.issue_token();
        let counting = manager.issue_token();
        let count = Arc::new(AtomicUsize::new(0));

        assert!(manager.register_callback(panicking, || {
            panic!("intentional");
        }));
        let count_clone = count.clone();
        assert!(manager.register_callback(counting, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        manager.start_cancel();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(manager.is_cancelled());
    }
}
