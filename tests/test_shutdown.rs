use runbox::server::shutdown::ShutdownManager;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_shutdown_manager_initialization() {
    let manager = ShutdownManager::new();
    assert!(!manager.is_shutting_down());
    assert_eq!(manager.active_requests(), 0);
}

#[tokio::test]
async fn test_wait_for_requests_completes_immediately_when_zero() {
    let manager = ShutdownManager::new();

    let start = std::time::Instant::now();
    manager.wait_for_requests(Duration::from_secs(1)).await;
    let elapsed = start.elapsed();

    assert!(elapsed < Duration::from_millis(100));
}

#[tokio::test]
async fn test_wait_for_requests_times_out() {
    let manager = ShutdownManager::new();
    manager.increment_requests();

    let start = std::time::Instant::now();
    manager.wait_for_requests(Duration::from_millis(100)).await;
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(90));
}

#[tokio::test]
async fn test_signal_wakes_waiters() {
    let manager = Arc::new(ShutdownManager::new());
    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.signaled().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.signal_shutdown();

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter was not woken")
        .unwrap();
    assert!(manager.is_shutting_down());
}

#[tokio::test]
async fn test_signaled_returns_after_the_fact() {
    let manager = ShutdownManager::new();
    manager.signal_shutdown();
    manager.signal_shutdown();

    tokio::time::timeout(Duration::from_millis(100), manager.signaled())
        .await
        .expect("already signalled");
    tokio::time::timeout(Duration::from_millis(100), manager.wait_for_shutdown())
        .await
        .expect("already signalled")
        .unwrap();
}
