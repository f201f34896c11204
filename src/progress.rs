use crate::error::{Error, Result};
use crate::metrics::MetricsSnapshot;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

/// A live bar for one scenario, fed by metric snapshots.
pub struct RunProgress {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl RunProgress {
    pub fn start(
        multi: &MultiProgress,
        name: &str,
        expected: u64,
        snapshots: watch::Receiver<MetricsSnapshot>,
    ) -> Result<Self> {
        let bar = multi.add(ProgressBar::new(expected));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map_err(|e| Error::Internal(e.to_string()))?
                .progress_chars("#>-"),
        );
        bar.set_prefix(name.to_string());

        let bar_clone = bar.clone();
        let task = tokio::spawn(async move {
            let mut stream = WatchStream::new(snapshots);
            while let Some(snapshot) = stream.next().await {
                bar_clone.set_position(snapshot.completed);
                bar_clone.set_message(status_line(&snapshot));
            }
        });

        Ok(Self { bar, task })
    }

    pub fn finish(self, snapshot: &MetricsSnapshot) {
        self.task.abort();
        if let Ok(style) = ProgressStyle::default_bar()
            .template("✅ [{elapsed_precise}] {prefix} [{bar:40.green/blue}] {pos}/{len} {msg}")
        {
            self.bar.set_style(style.progress_chars("#>-"));
        }
        self.bar.set_position(snapshot.completed);
        self.bar
            .finish_with_message(format!("{} - Completed", status_line(snapshot)));
    }
}

fn status_line(snapshot: &MetricsSnapshot) -> String {
    format!(
        "Sent: {} | In flight: {} | Success: {:.1}% | RPM: {:.1}",
        snapshot.dispatched, snapshot.in_flight, snapshot.success_rate, snapshot.requests_per_minute
    )
}
