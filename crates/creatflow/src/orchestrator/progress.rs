/// Progress reported once a job is claimed.
pub const CLAIMED_PERCENT: u8 = 10;
/// Upper bound while the fan-out is still running; 100 is reserved for the
/// commit.
pub const FANOUT_CEILING: u8 = 90;
/// Upper bound of the analysis stage.
pub const ANALYSIS_CEILING: u8 = 80;

/// Counts fan-out operations and maps them to a percentage: 10 on claim,
/// linearly up to 90 as operations complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTracker {
    total: usize,
    completed: usize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }

    /// Counts one finished operation (successful, skipped or failed) and
    /// returns the new percentage.
    pub fn advance(&mut self) -> u8 {
        self.completed = (self.completed + 1).min(self.total);
        self.percent()
    }

    pub fn percent(&self) -> u8 {
        scaled(self.completed, self.total, CLAIMED_PERCENT, FANOUT_CEILING)
    }
}

/// Analysis progress: 10 to 80 across `total` assets.
pub fn analysis_percent(processed: usize, total: usize) -> u8 {
    scaled(processed, total, CLAIMED_PERCENT, ANALYSIS_CEILING)
}

fn scaled(done: usize, total: usize, floor: u8, ceiling: u8) -> u8 {
    if total == 0 {
        return ceiling;
    }
    let span = (ceiling - floor) as usize;
    let step = done.min(total) * span / total;
    floor + step as u8
}
