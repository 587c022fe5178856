//! Forward and inverse delta kinematics, and the per-probe error
//! simulation the solver's inner loop runs against.

use crate::vector3::Vector3;

/// Fixed diagonal-rod length, millimetres.
pub const DIAGONAL_ROD: f64 = 189.75;

/// Base angular position of each tower before its angular adjustment,
/// degrees, in `{front-left, front-right, back}` order.
const BASE_ANGLES_DEG: [f64; 3] = [210.0, 330.0, 90.0];

/// Current geometry: per-tower angular/radial adjustments and endstop
/// biases, plus the delta radius and rod length the probes are checked
/// against.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionData {
    /// `[angle0, angle1, angle2, radius0, radius1, radius2]`.
    pub tower_adj: [f64; 6],
    pub endstop_adj: [f64; 3],
    pub delta_radius: f64,
}

impl CorrectionData {
    fn diagonal_rod_sq(&self) -> f64 {
        DIAGONAL_ROD * DIAGONAL_ROD
    }

    /// The three tower base positions in the XY plane for delta radius `r`.
    fn tower_positions(&self, r: f64) -> [(f64, f64); 3] {
        let mut positions = [(0.0, 0.0); 3];
        for k in 0..3 {
            let angle_rad = (BASE_ANGLES_DEG[k] + self.tower_adj[k]).to_radians();
            let radius = r + self.tower_adj[3 + k];
            positions[k] = (radius * angle_rad.cos(), radius * angle_rad.sin());
        }
        positions
    }

    /// Inverse kinematics: the three carriage heights that place the
    /// effector at `cartesian` with delta radius `r`.
    pub fn cartesian_to_actuator(&self, cartesian: [f64; 3], r: f64) -> [f64; 3] {
        let towers = self.tower_positions(r);
        let rod_sq = self.diagonal_rod_sq();
        let mut actuator = [0.0; 3];
        for k in 0..3 {
            let (tx, ty) = towers[k];
            let dx = tx - cartesian[0];
            let dy = ty - cartesian[1];
            actuator[k] = (rod_sq - dx * dx - dy * dy).sqrt() + cartesian[2];
        }
        actuator
    }

    /// Forward kinematics: the Cartesian effector position implied by
    /// three carriage heights `actuator`, via the circumcentre of the
    /// three tower-height points.
    pub fn actuator_to_cartesian(&self, actuator: [f64; 3], r: f64) -> [f64; 3] {
        let towers = self.tower_positions(r);
        let rod_sq = self.diagonal_rod_sq();

        let tower1 = Vector3::new(towers[0].0, towers[0].1, actuator[0]);
        let tower2 = Vector3::new(towers[1].0, towers[1].1, actuator[1]);
        let tower3 = Vector3::new(towers[2].0, towers[2].1, actuator[2]);

        let s12 = tower1.sub(tower2);
        let s23 = tower2.sub(tower3);
        let s13 = tower1.sub(tower3);
        let normal = s12.cross(s23);

        let magsq_s12 = s12.magsq();
        let magsq_s23 = s23.magsq();
        let magsq_s13 = s13.magsq();

        let inv_nmag_sq = 1.0 / normal.magsq();
        let q = 0.5 * inv_nmag_sq;

        let ka = q * magsq_s23 * s12.dot(s13);
        let kb = q * magsq_s13 * s12.dot(s23) * -1.0;
        let kc = q * magsq_s12 * s13.dot(s23);

        let circumcenter = Vector3::new(
            towers[0].0 * ka + towers[1].0 * kb + towers[2].0 * kc,
            towers[0].1 * ka + towers[1].1 * kb + towers[2].1 * kc,
            actuator[0] * ka + actuator[1] * kb + actuator[2] * kc,
        );

        let circumradius_sq = 0.5 * q * magsq_s12 * magsq_s23 * magsq_s13;
        let dist = (inv_nmag_sq * (rod_sq - circumradius_sq)).sqrt();

        let cartesian = circumcenter.sub(normal.mul(dist));
        [cartesian.x, cartesian.y, cartesian.z]
    }

    /// Re-simulate a probed point under the candidate `error` vector: run
    /// inverse kinematics at the probe's physical X/Y with its measured
    /// Z, add the per-tower endstop errors, then forward kinematics with
    /// the radius-corrected delta radius.
    pub fn error_simulation(&self, probe: [f64; 3], error: &[f64; 5]) -> [f64; 3] {
        let mut actuator = self.cartesian_to_actuator(probe, self.delta_radius);
        for (a, e) in actuator.iter_mut().zip(error.iter()) {
            *a += e;
        }
        self.actuator_to_cartesian(actuator, self.delta_radius + error[3])
    }
}
