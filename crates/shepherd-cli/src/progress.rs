//! Terminal rendering of a running broadcast.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;

use shepherd_core::broadcast::BroadcastProgress;

/// How much of the broadcast to show while it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressView {
    /// Bar with counts and the recipient in flight
    Full,
    /// A single status line
    Minimized,
}

/// Render snapshots until the broadcast reports it has finished (or the
/// dispatch task goes away).
pub async fn follow(mut progress: watch::Receiver<BroadcastProgress>, view: ProgressView) -> Result<()> {
    let bar = match view {
        ProgressView::Full => {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("█▓▒░"),
            );
            bar.set_prefix("Sending");
            bar
        }
        ProgressView::Minimized => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
            bar
        }
    };

    loop {
        let snapshot = progress.borrow_and_update().clone();
        render(&bar, view, &snapshot);
        if snapshot.finished {
            break;
        }
        if progress.changed().await.is_err() {
            break;
        }
    }

    bar.finish();
    Ok(())
}

fn render(bar: &ProgressBar, view: ProgressView, snapshot: &BroadcastProgress) {
    match view {
        ProgressView::Full => {
            bar.set_length(snapshot.total as u64);
            bar.set_position(snapshot.processed() as u64);
            bar.set_message(detail(snapshot));
        }
        ProgressView::Minimized => {
            bar.set_message(snapshot.status_line());
            bar.tick();
        }
    }
}

/// Text after the bar: failures, then what the dispatcher is doing
fn detail(snapshot: &BroadcastProgress) -> String {
    let mut parts = Vec::new();
    if snapshot.failed > 0 {
        parts.push(format!("{} failed", snapshot.failed));
    }
    if snapshot.finished {
        parts.push("done".to_string());
    } else if snapshot.waiting {
        parts.push(format!("batch {}/{} sent, pausing", snapshot.batch, snapshot.batches));
    } else if let Some(ref name) = snapshot.current {
        parts.push(format!("batch {}/{} - {}", snapshot.batch, snapshot.batches, name));
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_text() {
        let mut p = BroadcastProgress::new(23, 0, 3);
        p.batch = 2;
        p.current = Some("Ruth Moab".into());
        assert_eq!(detail(&p), "batch 2/3 - Ruth Moab");

        p.current = None;
        p.waiting = true;
        p.failed = 1;
        assert_eq!(detail(&p), "1 failed | batch 2/3 sent, pausing");

        p.finished = true;
        assert_eq!(detail(&p), "1 failed | done");
    }

    #[tokio::test]
    async fn test_follow_stops_when_dispatch_ends() {
        let (tx, rx) = watch::channel(BroadcastProgress::new(2, 0, 1));
        let render = tokio::spawn(follow(rx, ProgressView::Minimized));
        let mut done = BroadcastProgress::new(2, 0, 1);
        done.sent = 2;
        done.finished = true;
        tx.send_replace(done);
        render.await.unwrap().unwrap();

        let (tx, rx) = watch::channel(BroadcastProgress::new(5, 0, 1));
        drop(tx);
        follow(rx, ProgressView::Full).await.unwrap();
    }
}
