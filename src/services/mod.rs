pub mod docker;
pub mod health;
pub mod pipeline;
pub mod records;
pub mod scheduler;
pub mod ssh;
