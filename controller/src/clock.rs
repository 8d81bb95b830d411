use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use perfektday_common::engine::clock_set_argument;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("failed to run date: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("date --set exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("clock set did not finish within {0} ms")]
    Timeout(u64),
}

#[async_trait]
pub trait ClockSetter: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    async fn set(&self, target: NaiveDateTime) -> Result<(), ClockError>;
}

/// The host wall clock, set through `date --set`.
pub struct SystemClock;

#[async_trait]
impl ClockSetter for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    async fn set(&self, target: NaiveDateTime) -> Result<(), ClockError> {
        let output = Command::new("date")
            .arg(format!("--set={}", clock_set_argument(&target)))
            .output()
            .await?;

        if !output.status.success() {
            return Err(ClockError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
