//! Input events delivered to a session.

use crate::message::{ObjectId, Position};
use crate::role::InputHandler;

/// Depth at which tilt-created objects are placed.
pub const TILT_DEPTH: f64 = -2.0;

/// Semantic input from the device layer.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Tilt gesture already mapped to a scene position
    TiltCreateRequested(Position),

    /// Raw device orientation, in degrees
    TiltReading { beta: f64, gamma: f64 },

    /// Tap landed on an object
    TapInteractionRequested(ObjectId),

    /// Double-tap on the role indicator
    RoleSwitchRequested,

    /// The player declared the current prophecy fulfilled
    ProphecyFulfilled,

    /// Summon a volcano at a location
    VolcanoRequested(Position),
}

impl InputEvent {
    /// Handler that must be armed for this input to take effect.
    ///
    /// `None` for inputs no role gates.
    pub fn required_handler(&self) -> Option<InputHandler> {
        match self {
            InputEvent::TiltCreateRequested(_) | InputEvent::TiltReading { .. } => {
                Some(InputHandler::Tilt)
            }
            InputEvent::TapInteractionRequested(_) => Some(InputHandler::Tap),
            InputEvent::RoleSwitchRequested
            | InputEvent::ProphecyFulfilled
            | InputEvent::VolcanoRequested(_) => None,
        }
    }
}

/// Maps device orientation to a placement position.
///
/// `gamma` (left/right, ±90°) spans x in [-2, 2]; `beta` (front/back,
/// ±180°) spans y in [-4, 4].
pub fn tilt_to_position(beta: f64, gamma: f64) -> Position {
    Position::new(gamma / 90.0 * 2.0, beta / 180.0 * 4.0, TILT_DEPTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tilt_mapping() {
        assert_eq!(tilt_to_position(0.0, 0.0), Position::new(0.0, 0.0, -2.0));
        assert_eq!(tilt_to_position(90.0, 45.0), Position::new(1.0, 2.0, -2.0));
        assert_eq!(tilt_to_position(-180.0, -90.0), Position::new(-2.0, -4.0, -2.0));
    }

    #[test]
    fn test_required_handler() {
        assert_eq!(
            InputEvent::TiltReading { beta: 1.0, gamma: 1.0 }.required_handler(),
            Some(InputHandler::Tilt)
        );
        assert_eq!(
            InputEvent::TapInteractionRequested(ObjectId::from("obj_a_1")).required_handler(),
            Some(InputHandler::Tap)
        );
        assert_eq!(InputEvent::RoleSwitchRequested.required_handler(), None);
    }
}
