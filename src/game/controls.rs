//! Tilt Controls
//!
//! Per-peer kinematic model: a position on the ground plane, a facing
//! direction, and four movement intents integrated once per frame.

use crate::network::protocol::{Message, PeerId, SyncState};

/// Default walking speed (units/second).
pub const DEFAULT_SPEED: f32 = 10.0;

/// Default turning speed (radians/second).
pub const DEFAULT_ROTATION_SPEED: f32 = 1.0;

/// Movement intent, one per edge-triggered protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// Rotate clockwise.
    TurnRight,
    /// Rotate counter-clockwise.
    TurnLeft,
    /// Move along the facing direction.
    WalkForward,
    /// Move against the facing direction.
    WalkBackward,
}

impl Intent {
    /// All intents.
    pub const ALL: [Intent; 4] = [
        Intent::TurnRight,
        Intent::TurnLeft,
        Intent::WalkForward,
        Intent::WalkBackward,
    ];

    /// Protocol message announcing a change of this intent.
    pub fn message(self, from_id: PeerId, state: bool) -> Message {
        match self {
            Intent::TurnRight => Message::TurningRight { from_id, state },
            Intent::TurnLeft => Message::TurningLeft { from_id, state },
            Intent::WalkForward => Message::WalkingForward { from_id, state },
            Intent::WalkBackward => Message::WalkingBackward { from_id, state },
        }
    }

    /// Extract `(from_id, intent, state)` from an intent message.
    pub fn from_message(msg: &Message) -> Option<(PeerId, Intent, bool)> {
        match *msg {
            Message::TurningRight { from_id, state } => Some((from_id, Intent::TurnRight, state)),
            Message::TurningLeft { from_id, state } => Some((from_id, Intent::TurnLeft, state)),
            Message::WalkingForward { from_id, state } => {
                Some((from_id, Intent::WalkForward, state))
            }
            Message::WalkingBackward { from_id, state } => {
                Some((from_id, Intent::WalkBackward, state))
            }
            _ => None,
        }
    }
}

/// Kinematic state of one peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltControls {
    /// Position (x, y, z). Integration only moves x and z.
    pub position: [f32; 3],
    /// Facing on the ground plane, as (x, z).
    pub direction: [f32; 2],
    /// Walking speed (units/second).
    pub speed: f32,
    /// Turning speed (radians/second).
    pub rotation_speed: f32,
    /// Turning right.
    pub is_turning_right: bool,
    /// Turning left.
    pub is_turning_left: bool,
    /// Walking forward.
    pub is_walking_forward: bool,
    /// Walking backward.
    pub is_walking_backward: bool,
}

impl Default for TiltControls {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            direction: [1.0, 0.0],
            speed: DEFAULT_SPEED,
            rotation_speed: DEFAULT_ROTATION_SPEED,
            is_turning_right: false,
            is_turning_left: false,
            is_walking_forward: false,
            is_walking_backward: false,
        }
    }
}

impl TiltControls {
    /// Advance by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        if self.is_turning_right {
            self.direction = rotate(self.direction, dt * self.rotation_speed);
        }

        if self.is_turning_left {
            self.direction = rotate(self.direction, -dt * self.rotation_speed);
        }

        if self.is_walking_forward {
            self.step(self.speed * dt);
        }

        if self.is_walking_backward {
            self.step(-self.speed * dt);
        }
    }

    fn step(&mut self, distance: f32) {
        self.position[0] += distance * self.direction[0];
        self.position[2] += distance * self.direction[1];
    }

    /// Current value of an intent.
    pub fn intent(&self, intent: Intent) -> bool {
        match intent {
            Intent::TurnRight => self.is_turning_right,
            Intent::TurnLeft => self.is_turning_left,
            Intent::WalkForward => self.is_walking_forward,
            Intent::WalkBackward => self.is_walking_backward,
        }
    }

    /// Set an intent. Returns whether it changed.
    pub fn set_intent(&mut self, intent: Intent, state: bool) -> bool {
        let flag = match intent {
            Intent::TurnRight => &mut self.is_turning_right,
            Intent::TurnLeft => &mut self.is_turning_left,
            Intent::WalkForward => &mut self.is_walking_forward,
            Intent::WalkBackward => &mut self.is_walking_backward,
        };
        let changed = *flag != state;
        *flag = state;
        changed
    }

    /// Snapshot addressed from `from_id` to `to_id`.
    pub fn snapshot(&self, from_id: PeerId, to_id: PeerId) -> SyncState {
        SyncState {
            from_id,
            to_id,
            position: self.position,
            direction: self.direction,
            speed: self.speed,
            rotation_speed: self.rotation_speed,
            is_turning_right: self.is_turning_right,
            is_turning_left: self.is_turning_left,
            is_walking_forward: self.is_walking_forward,
            is_walking_backward: self.is_walking_backward,
        }
    }

    /// Overwrite everything from a snapshot.
    pub fn apply_snapshot(&mut self, sync: &SyncState) {
        self.position = sync.position;
        self.direction = sync.direction;
        self.speed = sync.speed;
        self.rotation_speed = sync.rotation_speed;
        self.is_turning_right = sync.is_turning_right;
        self.is_turning_left = sync.is_turning_left;
        self.is_walking_forward = sync.is_walking_forward;
        self.is_walking_backward = sync.is_walking_backward;
    }
}

fn rotate([x, y]: [f32; 2], angle: f32) -> [f32; 2] {
    let (sin, cos) = angle.sin_cos();
    [x * cos - y * sin, x * sin + y * cos]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_defaults() {
        let controls = TiltControls::default();
        assert_eq!(controls.position, [0.0, 0.0, 0.0]);
        assert_eq!(controls.direction, [1.0, 0.0]);
        assert_eq!(controls.speed, 10.0);
        assert_eq!(controls.rotation_speed, 1.0);
    }

    #[test]
    fn test_idle_does_not_move() {
        let mut controls = TiltControls::default();
        controls.update(1.0);
        assert_eq!(controls, TiltControls::default());
    }

    #[test]
    fn test_walk_forward() {
        let mut controls = TiltControls::default();
        controls.is_walking_forward = true;
        controls.update(0.5);

        assert!(close(controls.position[0], 5.0));
        assert_eq!(controls.position[1], 0.0);
        assert!(close(controls.position[2], 0.0));
    }

    #[test]
    fn test_walk_forward_and_backward_cancel() {
        let mut controls = TiltControls::default();
        controls.is_walking_forward = true;
        controls.is_walking_backward = true;
        controls.update(1.0);

        assert!(close(controls.position[0], 0.0));
        assert!(close(controls.position[2], 0.0));
    }

    #[test]
    fn test_turn_right_quarter() {
        let mut controls = TiltControls {
            rotation_speed: FRAC_PI_2,
            is_turning_right: true,
            ..Default::default()
        };
        controls.update(1.0);

        assert!(close(controls.direction[0], 0.0));
        assert!(close(controls.direction[1], 1.0));

        controls.is_turning_right = false;
        controls.is_walking_forward = true;
        controls.update(1.0);
        assert!(close(controls.position[0], 0.0));
        assert!(close(controls.position[2], 10.0));
    }

    #[test]
    fn test_turn_left_quarter() {
        let mut controls = TiltControls {
            rotation_speed: FRAC_PI_2,
            is_turning_left: true,
            ..Default::default()
        };
        controls.update(1.0);

        assert!(close(controls.direction[0], 0.0));
        assert!(close(controls.direction[1], -1.0));
    }

    #[test]
    fn test_set_intent_reports_edges() {
        let mut controls = TiltControls::default();
        assert!(controls.set_intent(Intent::WalkForward, true));
        assert!(!controls.set_intent(Intent::WalkForward, true));
        assert!(controls.intent(Intent::WalkForward));
        assert!(controls.set_intent(Intent::WalkForward, false));
        assert!(!controls.intent(Intent::WalkForward));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let a = PeerId::new([1; 16]);
        let b = PeerId::new([2; 16]);
        let source = TiltControls {
            position: [3.0, 1.0, -2.0],
            direction: [0.6, 0.8],
            speed: 4.0,
            rotation_speed: 2.0,
            is_turning_left: true,
            is_walking_backward: true,
            ..Default::default()
        };

        let sync = source.snapshot(a, b);
        assert_eq!(sync.from_id, a);
        assert_eq!(sync.to_id, b);

        let mut target = TiltControls::default();
        target.apply_snapshot(&sync);
        assert_eq!(target, source);
    }

    #[test]
    fn test_intent_messages() {
        let id = PeerId::new([7; 16]);
        for intent in Intent::ALL {
            let msg = intent.message(id, true);
            assert_eq!(Intent::from_message(&msg), Some((id, intent, true)));
        }
        assert_eq!(Intent::from_message(&Message::Hello), None);
    }
}
