//! Convergence and fault-injection scenarios for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// QR-001: Dreamers and Collapsers on a clean mesh
    Convergence,

    /// QR-002: Every replica re-delivered several times over
    EchoStorm,

    /// QR-003: A player joins after objects exist
    LateJoin,

    /// QR-004: Partition, diverge, heal, repair
    SplitBrain,

    /// QR-005: Lossy links repaired by anti-entropy
    LossyLink,

    /// QR-006: Prophecy threshold clears the scene everywhere
    RealityShatter,

    /// QR-007: Collapser debt stays bounded under penalties and decay
    DebtDrain,

    /// QR-008: Concurrent prophecy fulfilments across players
    Prophecy,

    /// QR-009: A player starts with the channel down and catches up
    OfflineStart,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Convergence,
            ScenarioId::EchoStorm,
            ScenarioId::LateJoin,
            ScenarioId::SplitBrain,
            ScenarioId::LossyLink,
            ScenarioId::RealityShatter,
            ScenarioId::DebtDrain,
            ScenarioId::Prophecy,
            ScenarioId::OfflineStart,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Convergence => "convergence",
            ScenarioId::EchoStorm => "echo_storm",
            ScenarioId::LateJoin => "late_join",
            ScenarioId::SplitBrain => "split_brain",
            ScenarioId::LossyLink => "lossy_link",
            ScenarioId::RealityShatter => "reality_shatter",
            ScenarioId::DebtDrain => "debt_drain",
            ScenarioId::Prophecy => "prophecy",
            ScenarioId::OfflineStart => "offline_start",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Convergence => "Dreamers create, Collapsers freeze and shatter; all scenes match after quiescence",
            ScenarioId::EchoStorm => "Replay every held envelope 3x; no duplicates, no double rendering",
            ScenarioId::LateJoin => "Late player catches up on the object backlog",
            ScenarioId::SplitBrain => "Partition in half, diverge, heal + anti-entropy, converge",
            ScenarioId::LossyLink => "30% link loss, anti-entropy restores the object set",
            ScenarioId::RealityShatter => "Prophecy threshold reached once; every registry cleared, one broadcast",
            ScenarioId::DebtDrain => "Collapser debt drained by penalties and decay stays in [0, 100]",
            ScenarioId::Prophecy => "25 fulfilments round-robin with threshold 10; exactly 2 reality-shatters",
            ScenarioId::OfflineStart => "Player boots offline, creates locally, reconnects and republishes",
        }
    }

    /// Returns true if the scenario injects network faults.
    pub fn is_fault_injection(&self) -> bool {
        matches!(
            self,
            ScenarioId::SplitBrain | ScenarioId::LossyLink | ScenarioId::OfflineStart
        )
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "convergence" | "qr-001" => Ok(ScenarioId::Convergence),
            "echo_storm" | "echostorm" | "qr-002" => Ok(ScenarioId::EchoStorm),
            "late_join" | "latejoin" | "qr-003" => Ok(ScenarioId::LateJoin),
            "split_brain" | "splitbrain" | "qr-004" => Ok(ScenarioId::SplitBrain),
            "lossy_link" | "lossylink" | "qr-005" => Ok(ScenarioId::LossyLink),
            "reality_shatter" | "realityshatter" | "qr-006" => Ok(ScenarioId::RealityShatter),
            "debt_drain" | "debtdrain" | "qr-007" => Ok(ScenarioId::DebtDrain),
            "prophecy" | "qr-008" => Ok(ScenarioId::Prophecy),
            "offline_start" | "offlinestart" | "qr-009" => Ok(ScenarioId::OfflineStart),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
            assert_eq!(id.to_string(), id.name());
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("QR-004".parse::<ScenarioId>(), Ok(ScenarioId::SplitBrain));
        assert_eq!("EchoStorm".parse::<ScenarioId>(), Ok(ScenarioId::EchoStorm));
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_fault_injection_flag() {
        let faulty: Vec<_> = ScenarioId::all().into_iter().filter(|s| s.is_fault_injection()).collect();
        assert_eq!(faulty, vec![ScenarioId::SplitBrain, ScenarioId::LossyLink, ScenarioId::OfflineStart]);
    }
}
