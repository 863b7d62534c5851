pub mod app;
pub mod models;

pub use app::{pk_of, TestApp, TestResult};
