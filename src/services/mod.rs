//! Frontend-facing services

pub mod progress;

pub use progress::{ConsoleProgressReporter, NoOpProgressReporter, ProgressReporter};
