pub mod tasks;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

/// Cron-driven housekeeping that runs beside the relay
pub struct Scheduler {
    inner: JobScheduler,
    jobs: Vec<String>,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            inner,
            jobs: Vec::new(),
        })
    }

    /// Run `task` on every tick of `cron_expr` (six fields, seconds first)
    pub async fn every<F>(&mut self, cron_expr: &str, name: &str, task: F) -> Result<()>
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let job_name = name.to_string();
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let name = job_name.clone();
            let fut = task();
            Box::pin(async move {
                debug!("Running scheduled task: {}", name);
                fut.await;
            })
        })
        .with_context(|| format!("Invalid schedule '{}' for task {}", cron_expr, name))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        self.jobs.push(name.to_string());
        info!("Scheduled task '{}' with cron: {}", name, cron_expr);
        Ok(())
    }

    /// Names of the registered tasks, in registration order
    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started with tasks: {}", self.jobs().join(", "));
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_every_records_job_names() {
        let mut scheduler = Scheduler::new().await.unwrap();
        scheduler
            .every("0 0 * * * *", "hourly", || async {}.boxed())
            .await
            .unwrap();
        scheduler
            .every("0 */5 * * * *", "five-minutely", || async {}.boxed())
            .await
            .unwrap();

        assert_eq!(scheduler.jobs(), ["hourly", "five-minutely"]);
    }

    #[tokio::test]
    async fn test_every_rejects_bad_expression() {
        let mut scheduler = Scheduler::new().await.unwrap();
        let err = scheduler
            .every("whenever", "broken", || async {}.boxed())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Invalid schedule 'whenever'"));
        assert!(scheduler.jobs().is_empty());
    }
}
