//! Prophecy board: rotating task text and the session-wide fulfilment count.

use quantum_env::PeerId;
use std::collections::HashSet;

/// Prophecies offered when a session starts.
pub const OPENING_PROPHECIES: [&str; 4] = [
    "Create water where shadows sleep",
    "Build towers of light in dark places",
    "Shatter silence with color",
    "Freeze time where memories linger",
];

/// Prophecies cycled by the rotation timer.
pub const ROTATING_PROPHECIES: [&str; 4] = [
    "Build bridges where shadows weep",
    "Drown sorrows in dry riverbeds",
    "Plant fire in frozen gardens",
    "Bury light beneath stone giants",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfilmentOutcome {
    /// Already counted (echo or redelivery)
    Duplicate,

    /// Counted; carries the new total
    Counted(u32),

    /// Counted, and the total is a multiple of the threshold
    ThresholdReached(u32),
}

fn pick(list: &[&'static str], draw: f64) -> &'static str {
    let idx = (draw.clamp(0.0, 1.0) * list.len() as f64) as usize;
    list[idx.min(list.len() - 1)]
}

#[derive(Debug, Clone)]
pub struct ProphecyBoard {
    current: &'static str,
    seen: HashSet<(PeerId, u64)>,
    fulfilled: u32,
    threshold: u32,
}

impl ProphecyBoard {
    /// `draw` picks the opening prophecy.
    pub fn new(threshold: u32, draw: f64) -> Self {
        Self {
            current: pick(&OPENING_PROPHECIES, draw),
            seen: HashSet::new(),
            fulfilled: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn current(&self) -> &'static str {
        self.current
    }

    pub fn rotate(&mut self, draw: f64) -> &'static str {
        self.current = pick(&ROTATING_PROPHECIES, draw);
        self.current
    }

    /// Counts a fulfilment once per `(creator, fulfilled_at)`.
    pub fn record(&mut self, creator: &PeerId, fulfilled_at: u64) -> FulfilmentOutcome {
        if !self.seen.insert((creator.clone(), fulfilled_at)) {
            return FulfilmentOutcome::Duplicate;
        }
        self.fulfilled += 1;
        if self.fulfilled % self.threshold == 0 {
            FulfilmentOutcome::ThresholdReached(self.fulfilled)
        } else {
            FulfilmentOutcome::Counted(self.fulfilled)
        }
    }

    pub fn fulfilled(&self) -> u32 {
        self.fulfilled
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_covers_whole_range() {
        assert_eq!(pick(&ROTATING_PROPHECIES, 0.0), ROTATING_PROPHECIES[0]);
        assert_eq!(pick(&ROTATING_PROPHECIES, 0.26), ROTATING_PROPHECIES[1]);
        assert_eq!(pick(&ROTATING_PROPHECIES, 0.999), ROTATING_PROPHECIES[3]);
        assert_eq!(pick(&ROTATING_PROPHECIES, 1.0), ROTATING_PROPHECIES[3]);
    }

    #[test]
    fn test_opening_and_rotation_lists() {
        let mut board = ProphecyBoard::new(10, 0.0);
        assert_eq!(board.current(), OPENING_PROPHECIES[0]);
        assert_eq!(board.rotate(0.5), ROTATING_PROPHECIES[2]);
        assert_eq!(board.current(), ROTATING_PROPHECIES[2]);
    }

    #[test]
    fn test_fulfilments_dedup_and_reach_threshold() {
        let mut board = ProphecyBoard::new(3, 0.0);
        let p = PeerId::from("p");
        assert_eq!(board.record(&p, 1), FulfilmentOutcome::Counted(1));
        assert_eq!(board.record(&p, 1), FulfilmentOutcome::Duplicate);
        assert_eq!(board.record(&p, 2), FulfilmentOutcome::Counted(2));
        assert_eq!(board.record(&PeerId::from("q"), 2), FulfilmentOutcome::ThresholdReached(3));
        assert_eq!(board.record(&p, 3), FulfilmentOutcome::Counted(4));
        assert_eq!(board.fulfilled(), 4);
    }
}
