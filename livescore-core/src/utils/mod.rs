pub mod backoff;

pub use backoff::calculate_retry_delay;
