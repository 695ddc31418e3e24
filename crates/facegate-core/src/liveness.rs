//! Challenge-based liveness gates.
//!
//! Both gates are fed one observation per camera frame and latch once the
//! challenge is met. A printed photo can neither blink nor follow a
//! commanded head turn.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_EAR_THRESHOLD: f32 = 0.25;
pub const DEFAULT_BLINK_CONSECUTIVE_FRAMES: u32 = 3;
pub const DEFAULT_HEAD_TURN_THRESHOLD_PX: f32 = 50.0;

/// Eye aspect ratio over a six-point eye contour.
///
/// Points follow the 68-point convention: p1 and p4 are the eye corners,
/// p2/p3 the upper lid, p6/p5 the lower lid.
pub fn eye_aspect_ratio(eye: &[(f32, f32); 6]) -> f32 {
    let dist = |a: (f32, f32), b: (f32, f32)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();

    let vertical = dist(eye[1], eye[5]) + dist(eye[2], eye[4]);
    let horizontal = dist(eye[0], eye[3]);
    if horizontal > f32::EPSILON {
        vertical / (2.0 * horizontal)
    } else {
        0.0
    }
}

/// Blink detector: EAR below threshold for enough consecutive frames, then reopen.
#[derive(Debug, Clone)]
pub struct BlinkGate {
    ear_threshold: f32,
    min_consecutive: u32,
    closed_frames: u32,
    blinks: u32,
}

impl BlinkGate {
    pub fn new(ear_threshold: f32, min_consecutive: u32) -> Self {
        Self {
            ear_threshold,
            min_consecutive: min_consecutive.max(1),
            closed_frames: 0,
            blinks: 0,
        }
    }

    /// Feed the mean EAR of the current frame, or `None` when no face was found.
    /// Returns whether a blink has been confirmed so far.
    pub fn observe(&mut self, ear: Option<f32>) -> bool {
        match ear {
            Some(ear) if ear < self.ear_threshold => {
                self.closed_frames += 1;
            }
            Some(ear) => {
                if self.closed_frames >= self.min_consecutive {
                    self.blinks += 1;
                    tracing::debug!(ear, closed_frames = self.closed_frames, "blink detected");
                }
                self.closed_frames = 0;
            }
            None => self.closed_frames = 0,
        }
        self.is_confirmed()
    }

    pub fn is_confirmed(&self) -> bool {
        self.blinks > 0
    }
}

impl Default for BlinkGate {
    fn default() -> Self {
        Self::new(DEFAULT_EAR_THRESHOLD, DEFAULT_BLINK_CONSECUTIVE_FRAMES)
    }
}

/// Commanded head-turn direction, in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn random() -> Self {
        if rand::random::<bool>() {
            Direction::Left
        } else {
            Direction::Right
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Left => "LEFT",
            Direction::Right => "RIGHT",
        })
    }
}

/// Head-turn detector: lateral face-center displacement past a pixel threshold.
#[derive(Debug, Clone)]
pub struct HeadTurnGate {
    direction: Direction,
    threshold_px: f32,
    reference_x: Option<f32>,
    confirmed: bool,
}

impl HeadTurnGate {
    pub fn new(direction: Direction, threshold_px: f32) -> Self {
        Self {
            direction,
            threshold_px,
            reference_x: None,
            confirmed: false,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Feed the face center of the current frame, or `None` when no face was found.
    ///
    /// The first center seen becomes the reference; losing the face drops it.
    pub fn observe(&mut self, center_x: Option<f32>) -> bool {
        if self.confirmed {
            return true;
        }
        let Some(x) = center_x else {
            self.reference_x = None;
            return false;
        };
        let reference = *self.reference_x.get_or_insert(x);
        let movement = x - reference;

        self.confirmed = match self.direction {
            Direction::Right => movement > self.threshold_px,
            Direction::Left => movement < -self.threshold_px,
        };
        if self.confirmed {
            tracing::debug!(movement, direction = %self.direction, "head turn detected");
        }
        self.confirmed
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }
}

/// What the face analysis saw in one frame, as needed by a liveness gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameObservation {
    pub center_x: Option<f32>,
    pub ear: Option<f32>,
}

/// Either liveness challenge.
#[derive(Debug, Clone)]
pub enum LivenessGate {
    Blink(BlinkGate),
    HeadTurn(HeadTurnGate),
}

impl LivenessGate {
    pub fn observe(&mut self, obs: FrameObservation) -> bool {
        match self {
            LivenessGate::Blink(gate) => gate.observe(obs.ear),
            LivenessGate::HeadTurn(gate) => gate.observe(obs.center_x),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        match self {
            LivenessGate::Blink(gate) => gate.is_confirmed(),
            LivenessGate::HeadTurn(gate) => gate.is_confirmed(),
        }
    }

    pub fn needs_eye_landmarks(&self) -> bool {
        matches!(self, LivenessGate::Blink(_))
    }

    /// Text shown to the subject.
    pub fn instruction(&self) -> String {
        match self {
            LivenessGate::Blink(_) => "Blink your eyes".to_string(),
            LivenessGate::HeadTurn(gate) => format!("Turn head {}", gate.direction()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eye(open: f32) -> [(f32, f32); 6] {
        // 30 px wide eye with lids `open` px apart
        [
            (0.0, 0.0),
            (10.0, -open / 2.0),
            (20.0, -open / 2.0),
            (30.0, 0.0),
            (20.0, open / 2.0),
            (10.0, open / 2.0),
        ]
    }

    #[test]
    fn test_ear_open_and_closed() {
        assert!((eye_aspect_ratio(&eye(12.0)) - 0.4).abs() < 1e-5);
        assert!(eye_aspect_ratio(&eye(3.0)) < DEFAULT_EAR_THRESHOLD);
    }

    #[test]
    fn test_ear_degenerate_eye() {
        assert_eq!(eye_aspect_ratio(&[(5.0, 5.0); 6]), 0.0);
    }

    #[test]
    fn test_blink_needs_reopen_after_consecutive_closed_frames() {
        let mut gate = BlinkGate::new(0.25, 3);
        for ear in [0.30, 0.10, 0.10, 0.10] {
            assert!(!gate.observe(Some(ear)));
        }
        // held closed is not yet a blink
        assert!(!gate.is_confirmed());
        assert!(gate.observe(Some(0.31)));
        // stays latched
        assert!(gate.observe(Some(0.31)));
    }

    #[test]
    fn test_short_dip_is_not_a_blink() {
        let mut gate = BlinkGate::new(0.25, 3);
        for ear in [0.10, 0.10, 0.30, 0.10, 0.30] {
            assert!(!gate.observe(Some(ear)));
        }
    }

    #[test]
    fn test_blink_counter_resets_when_face_lost() {
        let mut gate = BlinkGate::new(0.25, 2);
        gate.observe(Some(0.1));
        gate.observe(None);
        gate.observe(Some(0.1));
        assert!(!gate.observe(Some(0.3)));
    }

    #[test]
    fn test_head_turn_right() {
        let mut gate = HeadTurnGate::new(Direction::Right, 50.0);
        assert!(!gate.observe(Some(300.0)));
        assert!(!gate.observe(Some(340.0)));
        assert!(!gate.observe(Some(350.0)));
        assert!(gate.observe(Some(351.0)));
    }

    #[test]
    fn test_head_turn_wrong_direction_rejected() {
        let mut gate = HeadTurnGate::new(Direction::Left, 50.0);
        gate.observe(Some(300.0));
        assert!(!gate.observe(Some(400.0)));
        assert!(gate.observe(Some(240.0)));
    }

    #[test]
    fn test_head_turn_reference_cleared_without_face() {
        let mut gate = HeadTurnGate::new(Direction::Right, 50.0);
        gate.observe(Some(100.0));
        gate.observe(None);
        // new reference at 200, so 240 is only 40 px of movement
        assert!(!gate.observe(Some(200.0)));
        assert!(!gate.observe(Some(240.0)));
        assert!(gate.observe(Some(260.0)));
    }

    #[test]
    fn test_gate_instruction_and_dispatch() {
        let mut gate = LivenessGate::HeadTurn(HeadTurnGate::new(Direction::Left, 10.0));
        assert_eq!(gate.instruction(), "Turn head LEFT");
        assert!(!gate.needs_eye_landmarks());
        gate.observe(FrameObservation { center_x: Some(100.0), ear: None });
        assert!(gate.observe(FrameObservation { center_x: Some(80.0), ear: None }));
        assert!(gate.is_confirmed());

        let blink = LivenessGate::Blink(BlinkGate::default());
        assert!(blink.needs_eye_landmarks());
        assert_eq!(blink.instruction(), "Blink your eyes");
    }
}
