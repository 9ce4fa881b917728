use serde::Serialize;

/// Live state of a running broadcast.
///
/// Written only by the dispatch task and published as whole snapshots, so a
/// renderer never sees a half-updated counter set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastProgress {
    /// Eligible recipients (skipped ones are not counted)
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    /// Recipients excluded before dispatch for lacking an address
    pub skipped: usize,
    /// Name of the recipient currently in flight
    pub current: Option<String>,
    /// 1-based index of the batch being sent (0 before the first batch)
    pub batch: usize,
    pub batches: usize,
    /// Sleeping between batches
    pub waiting: bool,
    pub finished: bool,
}

impl BroadcastProgress {
    pub fn new(total: usize, skipped: usize, batches: usize) -> Self {
        Self {
            total,
            skipped,
            batches,
            ..Default::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.sent + self.failed
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed())
    }

    /// Whole-number completion percentage
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.processed() * 100) / self.total).min(100) as u8
    }

    /// One-line status for the minimized view
    pub fn status_line(&self) -> String {
        let mut line = format!("{}/{} sent", self.sent, self.total);
        if self.failed > 0 {
            line.push_str(&format!(", {} failed", self.failed));
        }
        if self.finished {
            line.push_str(" - done");
        } else if self.waiting {
            line.push_str(&format!(" - pausing after batch {}/{}", self.batch, self.batches));
        } else if let Some(ref name) = self.current {
            line.push_str(&format!(" - sending to {}", name));
        }
        line
    }
}

/// One recipient that could not be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub recipient_id: String,
    pub recipient: String,
    pub error: String,
}

/// Final outcome handed back to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl BroadcastReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_and_remaining() {
        let mut p = BroadcastProgress::new(8, 1, 1);
        assert_eq!(p.percent(), 0);
        p.sent = 3;
        p.failed = 1;
        assert_eq!(p.processed(), 4);
        assert_eq!(p.remaining(), 4);
        assert_eq!(p.percent(), 50);
        assert_eq!(BroadcastProgress::new(0, 3, 0).percent(), 100);
    }

    #[test]
    fn test_status_line() {
        let mut p = BroadcastProgress::new(12, 0, 2);
        p.sent = 2;
        p.batch = 1;
        p.current = Some("Ruth Moab".to_string());
        assert_eq!(p.status_line(), "2/12 sent - sending to Ruth Moab");

        p.current = None;
        p.waiting = true;
        p.failed = 1;
        assert_eq!(p.status_line(), "2/12 sent, 1 failed - pausing after batch 1/2");

        p.waiting = false;
        p.finished = true;
        assert_eq!(p.status_line(), "2/12 sent, 1 failed - done");
    }
}
