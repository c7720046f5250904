//! Role state machine with creation cooldown and switch debounce.

use serde::{Deserialize, Serialize};

/// The two roles a peer can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Creates quantum objects by gesture
    #[default]
    Dreamer,

    /// Destroys or neutralizes objects, drains debt over time
    Collapser,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Dreamer => Role::Collapser,
            Role::Collapser => Role::Dreamer,
        }
    }

    /// Upper-case label shown to players.
    pub fn label(self) -> &'static str {
        match self {
            Role::Dreamer => "DREAMER",
            Role::Collapser => "COLLAPSER",
        }
    }

    /// The input handler this role arms.
    pub fn handler(self) -> InputHandler {
        match self {
            Role::Dreamer => InputHandler::Tilt,
            Role::Collapser => InputHandler::Tap,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Input handlers; exactly one is live at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputHandler {
    /// Device tilt creates objects
    Tilt,

    /// Tap on an object interacts with it
    Tap,
}

/// An accepted role switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleTransition {
    pub from: Role,
    pub to: Role,
    pub disarmed: InputHandler,
    pub armed: InputHandler,
}

/// Tracks the local role and the timers that gate actions.
#[derive(Debug, Clone)]
pub struct RoleMachine {
    role: Role,
    armed: InputHandler,
    last_switch_at: Option<u64>,
    last_creation_at: Option<u64>,
    debounce_ms: u64,
    creation_cooldown_ms: u64,
}

impl RoleMachine {
    /// Starts as Dreamer with the tilt handler armed.
    pub fn new(debounce_ms: u64, creation_cooldown_ms: u64) -> Self {
        Self {
            role: Role::Dreamer,
            armed: Role::Dreamer.handler(),
            last_switch_at: None,
            last_creation_at: None,
            debounce_ms,
            creation_cooldown_ms,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn armed_handler(&self) -> InputHandler {
        self.armed
    }

    /// Flips the role unless a switch was accepted within the debounce window.
    pub fn switch_role(&mut self, now_ms: u64) -> Option<RoleTransition> {
        if let Some(last) = self.last_switch_at {
            if now_ms.saturating_sub(last) < self.debounce_ms {
                return None;
            }
        }

        let from = self.role;
        let to = from.other();
        let disarmed = self.armed;
        self.role = to;
        self.armed = to.handler();
        self.last_switch_at = Some(now_ms);

        Some(RoleTransition {
            from,
            to,
            disarmed,
            armed: self.armed,
        })
    }

    /// Creation gate: Dreamer only, and outside the cooldown.
    ///
    /// Records `now_ms` when accepted.
    pub fn try_begin_creation(&mut self, now_ms: u64) -> bool {
        if self.role != Role::Dreamer || self.armed != InputHandler::Tilt {
            return false;
        }
        if let Some(last) = self.last_creation_at {
            if now_ms.saturating_sub(last) < self.creation_cooldown_ms {
                return false;
            }
        }
        self.last_creation_at = Some(now_ms);
        true
    }

    pub fn last_creation_at(&self) -> Option<u64> {
        self.last_creation_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_dreamer_with_tilt() {
        let roles = RoleMachine::new(300, 2000);
        assert_eq!(roles.role(), Role::Dreamer);
        assert_eq!(roles.armed_handler(), InputHandler::Tilt);
    }

    #[test]
    fn test_switch_swaps_handlers() {
        let mut roles = RoleMachine::new(300, 2000);
        let t = roles.switch_role(1_000).unwrap();
        assert_eq!(t.from, Role::Dreamer);
        assert_eq!(t.to, Role::Collapser);
        assert_eq!(t.disarmed, InputHandler::Tilt);
        assert_eq!(t.armed, InputHandler::Tap);
        assert_eq!(roles.armed_handler(), InputHandler::Tap);
    }

    #[test]
    fn test_switch_debounce_collapses_bursts() {
        let mut roles = RoleMachine::new(300, 2000);
        assert!(roles.switch_role(1_000).is_some());
        assert!(roles.switch_role(1_100).is_none());
        assert!(roles.switch_role(1_299).is_none());
        assert_eq!(roles.role(), Role::Collapser);

        assert!(roles.switch_role(1_300).is_some());
        assert_eq!(roles.role(), Role::Dreamer);
    }

    #[test]
    fn test_creation_cooldown() {
        let mut roles = RoleMachine::new(300, 2000);
        assert!(roles.try_begin_creation(10_000));
        assert!(!roles.try_begin_creation(11_999));
        assert!(roles.try_begin_creation(12_000));
        assert_eq!(roles.last_creation_at(), Some(12_000));
    }

    #[test]
    fn test_collapser_cannot_create() {
        let mut roles = RoleMachine::new(300, 2000);
        roles.switch_role(0);
        assert!(!roles.try_begin_creation(10_000));
        // A rejected attempt does not arm the cooldown.
        roles.switch_role(1_000);
        assert!(roles.try_begin_creation(1_001));
    }
}
