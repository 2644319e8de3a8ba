//! Receiver points and their kinematics.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::propagation::Position;

/// A probability `gen_bool` accepts. NaN counts as never.
pub(crate) fn unit_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// How a mobile receiver moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPattern {
    /// Pedestrian random walk; occasionally picks a new heading.
    Random,
    /// Vehicle holding its heading until it meets the area boundary.
    Linear,
}

/// Kinematic state of a mobile receiver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReceiverMotion {
    pub speed_kmh: f64,
    /// Heading in degrees, counter-clockwise from the +x axis.
    pub heading_deg: f64,
    pub pattern: MotionPattern,
}

/// A receiver in the service area. Static receivers have no motion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReceiverPoint {
    pub position: Position,
    pub motion: Option<ReceiverMotion>,
}

impl ReceiverPoint {
    pub fn fixed(position: Position) -> Self {
        Self {
            position,
            motion: None,
        }
    }

    pub fn mobile(position: Position, motion: ReceiverMotion) -> Self {
        Self {
            position,
            motion: Some(motion),
        }
    }

    pub fn is_mobile(&self) -> bool {
        self.motion.is_some()
    }

    pub fn speed_kmh(&self) -> f64 {
        self.motion.map_or(0.0, |m| m.speed_kmh)
    }

    /// Distance from the tower, derived from the current position.
    pub fn range_km(&self) -> f64 {
        self.position.range_km()
    }

    /// Move along the heading for `dt_seconds`, reflecting off the walls of
    /// the square `[-half_km, half_km]²`.
    pub(crate) fn advance<R: Rng + ?Sized>(
        &mut self,
        dt_seconds: f64,
        half_km: f64,
        turn_probability: f64,
        rng: &mut R,
    ) {
        let Some(motion) = self.motion.as_mut() else {
            return;
        };

        let step_km = motion.speed_kmh / 3600.0 * dt_seconds;
        let heading = motion.heading_deg.to_radians();
        let mut x = self.position.x_km + step_km * heading.cos();
        let mut y = self.position.y_km + step_km * heading.sin();

        // A long step can cross the square more than once
        for _ in 0..4 {
            if x > half_km {
                x = 2.0 * half_km - x;
                motion.heading_deg = 180.0 - motion.heading_deg;
            } else if x < -half_km {
                x = -2.0 * half_km - x;
                motion.heading_deg = 180.0 - motion.heading_deg;
            }
            if y > half_km {
                y = 2.0 * half_km - y;
                motion.heading_deg = -motion.heading_deg;
            } else if y < -half_km {
                y = -2.0 * half_km - y;
                motion.heading_deg = -motion.heading_deg;
            }
        }

        self.position = Position::new(x.clamp(-half_km, half_km), y.clamp(-half_km, half_km));

        if motion.pattern == MotionPattern::Random && rng.gen_bool(unit_probability(turn_probability)) {
            motion.heading_deg = rng.gen_range(0.0..360.0);
        }
        motion.heading_deg = motion.heading_deg.rem_euclid(360.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn vehicle(x: f64, y: f64, heading_deg: f64) -> ReceiverPoint {
        ReceiverPoint::mobile(
            Position::new(x, y),
            ReceiverMotion {
                speed_kmh: 36.0,
                heading_deg,
                pattern: MotionPattern::Linear,
            },
        )
    }

    #[test]
    fn test_straight_line_motion() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut point = vehicle(0.0, 0.0, 0.0);
        // 36 km/h for 10 s is 0.1 km
        point.advance(10.0, 2.0, 0.0, &mut rng);
        assert!((point.position.x_km - 0.1).abs() < 1e-12);
        assert!(point.position.y_km.abs() < 1e-12);
    }

    #[test]
    fn test_reflects_off_east_wall() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut point = vehicle(1.95, 0.0, 0.0);
        point.advance(10.0, 2.0, 0.0, &mut rng);
        assert!((point.position.x_km - 1.95).abs() < 1e-9);
        assert!((point.motion.unwrap().heading_deg - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_reflects_off_north_wall() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut point = vehicle(0.0, 1.95, 90.0);
        point.advance(10.0, 2.0, 0.0, &mut rng);
        assert!((point.position.y_km - 1.95).abs() < 1e-9);
        assert!((point.motion.unwrap().heading_deg - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_static_point_never_moves() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut point = ReceiverPoint::fixed(Position::new(1.0, 1.0));
        point.advance(1000.0, 2.0, 1.0, &mut rng);
        assert_eq!(point.position, Position::new(1.0, 1.0));
        assert_eq!(point.speed_kmh(), 0.0);
    }

    #[test]
    fn test_random_walker_turns() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut point = ReceiverPoint::mobile(
            Position::ORIGIN,
            ReceiverMotion {
                speed_kmh: 0.0,
                heading_deg: 45.0,
                pattern: MotionPattern::Random,
            },
        );
        point.advance(1.0, 2.0, 1.0, &mut rng);
        let heading = point.motion.unwrap().heading_deg;
        assert!((0.0..360.0).contains(&heading));
        assert_ne!(heading, 45.0);
    }
}
