use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

mod retry;
mod timeout;
mod timer;

pub use retry::{Retry, RetryHandle, retry};
pub use timeout::{IntoOperation, Operation, TimeoutHook, with_timeout};
pub use timer::{Timer, TimerHandle, timer};

/// A pending `async_std::task::sleep`.
type Delay = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Locks a guard, recovering it if poisoned.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
