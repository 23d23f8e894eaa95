use async_std::task::block_on;

use crate::asynchronous::{
    example_abandon_retry, example_cancellable_timer, example_retry_with_backoff,
    example_retry_with_timeout, example_timeout_hook,
};

mod asynchronous;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    block_on(async {
        println!("Running cancellable timer example:");
        example_cancellable_timer().await;

        println!("\nRunning timeout hook example:");
        example_timeout_hook().await;

        println!("\nRunning retry with backoff example:");
        example_retry_with_backoff().await;

        println!("\nRunning retry around a timeout example:");
        example_retry_with_timeout().await;

        println!("\nRunning abandoned retry example:");
        example_abandon_retry().await;
    });
}
