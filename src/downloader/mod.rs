pub mod command;
pub mod orchestrator;
pub mod progress;
pub mod runner;

pub use command::{DownloadCommand, Identity, build_command};
pub use orchestrator::{
    AttemptOutcome, DownloadAttempt, DownloadError, DownloadOptions, DownloadReport, Downloader,
    RetryPolicy, is_rate_limited,
};
pub use progress::{
    PROGRESS_INTERVAL, ProgressDispatcher, ProgressReporter, ProgressSample, ProgressThrottler,
    parse_progress, render_bar,
};
pub use runner::{Aria2Runner, ProcessRunner, RunError};
