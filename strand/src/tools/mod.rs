//! Higher-level helpers built on the task driver.

mod retry;

pub use retry::{Attempt, Retry, retry};
