//! Tests for the concurrency queue.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures::future::join_all;
    use tokio::time::{sleep, Instant};

    use crate::queue::{ConcurrencyQueue, ConcurrencyQueueConfig, QueueError};

    fn queue(max_concurrency: usize) -> ConcurrencyQueue {
        ConcurrencyQueue::new(ConcurrencyQueueConfig {
            max_concurrency,
            max_waiting: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_limit() {
        let q = queue(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let origin = Instant::now();

        let ops = (0..5).map(|i| {
            let q = q.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let starts = Arc::clone(&starts);
            async move {
                q.enqueue(|| async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    starts.lock().unwrap().push((i, origin.elapsed()));
                    sleep(Duration::from_millis(100)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(i)
                })
                .await
            }
        });

        let results = join_all(ops).await;
        assert_eq!(results, vec![Ok(0), Ok(1), Ok(2), Ok(3), Ok(4)]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);

        let starts = starts.lock().unwrap();
        let fifth = starts.iter().find(|(i, _)| *i == 4).unwrap().1;
        assert!(fifth >= Duration::from_millis(100), "fifth op started at {fifth:?}");
        assert_eq!(q.running(), 0);
        assert_eq!(q.completed(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_in_arrival_order() {
        let q = queue(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let ops = (0..4).map(|i| {
            let q = q.clone();
            let order = Arc::clone(&order);
            async move {
                q.enqueue(|| async move {
                    order.lock().unwrap().push(i);
                    sleep(Duration::from_millis(10)).await;
                    Ok::<_, ()>(())
                })
                .await
            }
        });
        join_all(ops).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn raising_limit_admits_several_waiters_at_once() {
        let q = queue(1);
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            let mut release = release_rx.clone();
            handles.push(tokio::spawn(async move {
                q.enqueue(|| async move {
                    while !*release.borrow() {
                        if release.changed().await.is_err() {
                            break;
                        }
                    }
                    Ok::<_, ()>(())
                })
                .await
            }));
        }

        sleep(Duration::from_millis(1)).await;
        assert_eq!(q.running(), 1);
        assert_eq!(q.waiting(), 3);

        assert_eq!(q.set_max_concurrency(3), 3);
        assert_eq!(q.running(), 3);
        assert_eq!(q.waiting(), 1);

        release_tx.send(true).unwrap();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(()));
        }
        assert_eq!(q.running(), 0);
    }

    #[test]
    fn limit_is_clamped() {
        let q = queue(0);
        assert_eq!(q.max_concurrency(), 1);
        assert_eq!(q.set_max_concurrency(50), 20);
        assert_eq!(q.set_max_concurrency(0), 1);
        assert_eq!(q.set_max_concurrency(7), 7);
    }

    #[tokio::test]
    async fn operation_error_passes_through_and_frees_slot() {
        let q = queue(1);
        let err = q
            .enqueue(|| async { Err::<(), _>("boom") })
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::Operation("boom"));
        assert_eq!(q.failed(), 1);
        assert_eq!(q.running(), 0);

        let ok = q.enqueue(|| async { Ok::<_, &str>(5) }).await;
        assert_eq!(ok, Ok(5));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_waiting_list_rejects_overflow() {
        let q = ConcurrencyQueue::new(ConcurrencyQueueConfig {
            max_concurrency: 1,
            max_waiting: Some(1),
        });

        let running = {
            let q = q.clone();
            tokio::spawn(async move {
                q.enqueue(|| async {
                    sleep(Duration::from_millis(50)).await;
                    Ok::<_, ()>(())
                })
                .await
            })
        };
        let waiting = {
            let q = q.clone();
            tokio::spawn(async move { q.enqueue(|| async { Ok::<_, ()>(()) }).await })
        };
        sleep(Duration::from_millis(1)).await;
        assert_eq!(q.waiting(), 1);

        let rejected = q.enqueue(|| async { Ok::<_, ()>(()) }).await;
        assert_eq!(rejected, Err(QueueError::QueueFull { waiting: 1, max: 1 }));

        assert!(running.await.unwrap().is_ok());
        assert!(waiting.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_waiters_and_rejects_new_work() {
        let q = queue(1);
        let blocker = {
            let q = q.clone();
            tokio::spawn(async move {
                q.enqueue(|| async {
                    sleep(Duration::from_millis(50)).await;
                    Ok::<_, ()>("done")
                })
                .await
            })
        };
        let queued = {
            let q = q.clone();
            tokio::spawn(async move { q.enqueue(|| async { Ok::<_, ()>("never") }).await })
        };
        sleep(Duration::from_millis(1)).await;

        q.close();
        assert!(q.is_closed());
        assert_eq!(queued.await.unwrap(), Err(QueueError::Closed));
        assert_eq!(blocker.await.unwrap(), Ok("done"));
        assert_eq!(
            q.enqueue(|| async { Ok::<_, ()>(()) }).await,
            Err(QueueError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waiter_gives_up_its_place() {
        let q = queue(1);
        let blocker = {
            let q = q.clone();
            tokio::spawn(async move {
                q.enqueue(|| async {
                    sleep(Duration::from_millis(50)).await;
                    Ok::<_, ()>(())
                })
                .await
            })
        };
        let abandoned = {
            let q = q.clone();
            tokio::spawn(async move { q.enqueue(|| async { Ok::<_, ()>(()) }).await })
        };
        sleep(Duration::from_millis(1)).await;
        abandoned.abort();
        let _ = abandoned.await;

        let next = q.enqueue(|| async { Ok::<_, ()>(9) }).await;
        assert_eq!(next, Ok(9));
        assert!(blocker.await.unwrap().is_ok());
        assert_eq!(q.running(), 0);
        assert_eq!(q.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waiter_does_not_count_against_bound() {
        let q = ConcurrencyQueue::new(ConcurrencyQueueConfig {
            max_concurrency: 1,
            max_waiting: Some(1),
        });
        let blocker = {
            let q = q.clone();
            tokio::spawn(async move {
                q.enqueue(|| async {
                    sleep(Duration::from_secs(10)).await;
                    Ok::<_, ()>(())
                })
                .await
            })
        };
        let abandoned = {
            let q = q.clone();
            tokio::spawn(async move { q.enqueue(|| async { Ok::<_, ()>(()) }).await })
        };
        sleep(Duration::from_millis(1)).await;
        assert_eq!(q.waiting(), 1);

        abandoned.abort();
        let _ = abandoned.await;
        assert_eq!(q.waiting(), 0);

        // The freed place in line is available while the blocker still runs.
        let replacement = {
            let q = q.clone();
            tokio::spawn(async move { q.enqueue(|| async { Ok::<_, ()>(7) }).await })
        };
        sleep(Duration::from_millis(1)).await;
        assert_eq!(q.running(), 1);
        assert_eq!(q.waiting(), 1);

        assert_eq!(replacement.await.unwrap(), Ok(7));
        assert!(blocker.await.unwrap().is_ok());
        assert_eq!(q.completed(), 2);
    }
}
