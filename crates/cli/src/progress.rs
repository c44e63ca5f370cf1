// Live progress bar fed from the run's lock-free progress counters

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use surge_harness::run::RunProgress;
use tokio::task::JoinHandle;

const REFRESH: Duration = Duration::from_millis(200);

pub struct ProgressReporter {
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn start(progress: Arc<RunProgress>) -> Self {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("   {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }

        let handle = tokio::spawn(async move {
            loop {
                pb.set_length(progress.total().as_millis() as u64);
                pb.set_position(progress.elapsed().as_millis() as u64);
                pb.set_message(format!(
                    "{}/{} VUs, {} iterations",
                    progress.active_vus(),
                    progress.target(),
                    progress.iterations()
                ));
                if progress.is_finished() {
                    break;
                }
                tokio::time::sleep(REFRESH).await;
            }
            pb.finish_and_clear();
        });

        Self { handle }
    }

    /// Wait for the bar to clear itself once the run has finished
    pub async fn finish(self) {
        let _ = self.handle.await;
    }
}
