use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_std::task::sleep;
use futures::future::{Either, select};
use rand::{Rng, rng};

use settle_rs::asynchronous::{Operation, retry, timer, with_timeout};
use settle_rs::config::RetryConfig;
use settle_rs::error::{BoxError, ErrorSpec};

// Simulates a call to a service that answers slowly and fails about half of the time.
async fn flaky_service() -> Result<u32, BoxError> {
    let (latency, fails) = {
        let mut rng = rng();
        (rng.random_range(5..40), rng.random_bool(0.5))
    };
    sleep(Duration::from_millis(latency)).await;
    if fails {
        return Err(format!("service failed after {}ms", latency).into());
    }
    Ok(latency as u32)
}

// Example 1: Race a timer against some work, then cancel it
pub async fn example_cancellable_timer() {
    let deadline = timer::<BoxError>(Duration::from_millis(20), "took too long");
    let work = Box::pin(async {
        sleep(Duration::from_millis(5)).await;
        "work finished"
    });

    match select(deadline, work).await {
        Either::Left((err, _)) => println!("Timer fired: {}", err),
        Either::Right((value, deadline)) => {
            deadline.cancel();
            println!("Work won the race: {}", value);
        }
    }
}

// Example 2: Timeout with a cooperative cancellation hook
pub async fn example_timeout_hook() {
    let abandoned = Arc::new(AtomicBool::new(false));
    let flag = abandoned.clone();

    let operation = Operation::new(async {
        sleep(Duration::from_millis(100)).await;
        Ok::<_, BoxError>("slow answer")
    })
    .on_timeout(move || {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });

    match with_timeout(operation, Duration::from_millis(30), ErrorSpec::default()).await {
        Ok(value) => println!("Success: {}", value),
        Err(e) => println!(
            "Failed: {} (operation told to stop: {})",
            e,
            abandoned.load(Ordering::SeqCst)
        ),
    }
}

// Example 3: Retry with backoff and a failure report
pub async fn example_retry_with_backoff() {
    let config = RetryConfig::new(6, Duration::from_millis(10))
        .with_backoff_exponent(2.0)
        .with_backoff_max(Duration::from_millis(100))
        .with_report(|e: &BoxError, attempt| println!("Attempt #{} failed: {}", attempt, e));

    match retry(flaky_service, config).await {
        Ok(latency) => println!("Success after {}ms", latency),
        Err(e) => println!("Giving up: {}", e),
    }
}

// Example 4: Each attempt gets its own time budget
pub async fn example_retry_with_timeout() {
    let config = RetryConfig::new(5, Duration::from_millis(10)).with_report(
        |e: &BoxError, attempt| println!("Attempt #{} failed: {}", attempt, e),
    );

    let result = retry(
        || with_timeout(flaky_service(), Duration::from_millis(25), "attempt timed out"),
        config,
    )
    .await;

    match result {
        Ok(latency) => println!("Success after {}ms", latency),
        Err(e) => println!("Giving up: {}", e),
    }
}

// Example 5: Settle through another path and stop the retries silently
pub async fn example_abandon_retry() {
    let session = retry(
        || async { Err::<(), BoxError>("still failing".into()) },
        RetryConfig::default().with_delay(Duration::from_millis(10)),
    );
    let handle = session.handle();
    let other_path = Box::pin(async {
        sleep(Duration::from_millis(35)).await;
        "answer from the cache"
    });

    match select(session, other_path).await {
        Either::Left((result, _)) => println!("Retry settled first: {:?}", result.err()),
        Either::Right((value, session)) => {
            handle.abandon();
            println!(
                "Using {} after {} attempts; retry stopped: {}",
                value,
                session.attempts(),
                handle.is_done()
            );
        }
    }
}
