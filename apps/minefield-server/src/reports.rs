//! Chat texts sent when a round ends.

use std::fmt::Write as _;
use std::time::Duration;

use minefield_board::Statistics;

use crate::reward::RewardOutcome;
use crate::session::ActionLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Won,
    Lost,
    /// A mine went off but the field still has lives left.
    Step { remain: u32, ttl: u32 },
}

/// Everything a terminal or step report shows.
#[derive(Debug, Clone)]
pub struct Report {
    pub kind: ReportKind,
    pub stats: Statistics,
    pub actions: ActionLog,
    pub elapsed: Duration,
    pub timeouts: u64,
    pub reward: RewardOutcome,
}

impl Report {
    pub fn render(&self) -> String {
        let last = self
            .actions
            .last_player()
            .map(|user| user.mention())
            .unwrap_or_else(|| "somebody".to_string());
        let footer = format!(
            "Time {:.3}s, {} timeouts\n\n{} {}",
            self.elapsed.as_secs_f64(),
            self.timeouts,
            last,
            self.reward
        );
        match self.kind {
            ReportKind::Step { remain, ttl } => format!(
                "{last} stepped on a mine!\n{footer}\n\nField lives: ({remain}/{ttl})"
            ),
            ReportKind::Won => format!(
                "Every last cell is open, the field is clear!\n{}\n\n{last} made the final tap.\n\n{footer}\n\n/mine to start a new game",
                self.summary()
            ),
            ReportKind::Lost => format!(
                "A flash of light and up you go...\n{}\n\n{last} set off the last mine.\n\n{footer}\n\n/mine to start a new game",
                self.summary()
            ),
        }
    }

    fn summary(&self) -> String {
        let mut text = format!(
            "Map: Op {} / Is {} / 3BV {}\nTotal actions {}\nPlayers:",
            self.stats.openings,
            self.stats.islands,
            self.stats.bbbv,
            self.actions.total()
        );
        for (user, count) in self.actions.counts() {
            let _ = write!(text, "\n{} - {} actions", user.mention(), count);
        }
        text
    }
}
