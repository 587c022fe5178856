//! The iterative endstop/radius/height correction solver.

use thiserror::Error;
use tracing::{debug, warn};

use crate::kinematics::CorrectionData;

/// Hard iteration cap carried over from the original solver; beyond this
/// the probe set is treated as irreconcilable rather than looping forever.
const MAX_ITERATIONS: u32 = 25_530;

const TOWER_PROBE_POSITIONS: [(f64, f64); 3] = [(-73.61, -42.50), (73.61, -42.50), (0.0, 85.00)];
const CENTRE_PROBE_POSITION: (f64, f64) = (0.0, 0.0);

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration did not converge within {MAX_ITERATIONS} iterations")]
    NoConvergence,
}

/// The five corrections the solver produces: endstop deltas for the three
/// towers, a radius delta, and a height delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionResult {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
    pub h: f64,
}

/// Four probed deviations: three tower-foot points at the 120°-symmetric
/// positions, plus one near-centre point.
#[derive(Debug, Clone, Copy)]
pub struct ProbeDeviations {
    pub tower0: f64,
    pub tower1: f64,
    pub tower2: f64,
    pub centre: f64,
}

fn probe_points(probes: ProbeDeviations) -> [[f64; 3]; 4] {
    [
        [TOWER_PROBE_POSITIONS[0].0, TOWER_PROBE_POSITIONS[0].1, probes.tower0],
        [TOWER_PROBE_POSITIONS[1].0, TOWER_PROBE_POSITIONS[1].1, probes.tower1],
        [TOWER_PROBE_POSITIONS[2].0, TOWER_PROBE_POSITIONS[2].1, probes.tower2],
        [CENTRE_PROBE_POSITION.0, CENTRE_PROBE_POSITION.1, probes.centre],
    ]
}

/// Run the inner-loop solver: adjust a five-element error vector
/// `(e0,e1,e2,e3,e4)` seeded from the current endstops, radius and height
/// until all three tower pairs agree within tolerance (and, if enabled,
/// until the radius/height corrections settle too).
fn calculate_error(
    points: &[[f64; 3]; 4],
    seed: [f64; 5],
    radius_enabled: bool,
    height_enabled: bool,
    data: &CorrectionData,
) -> Result<CorrectionResult, CalibrationError> {
    let mut error = [0.0f64; 5];
    let mut temp: [[f64; 3]; 4] = std::array::from_fn(|i| data.error_simulation(points[i], &error));

    let mut count = 0u32;
    loop {
        let mut changed = false;

        for i in 0..3 {
            let a = temp[i][2] - temp[(i + 1) % 3][2];
            let b = temp[i][2] - temp[(i + 2) % 3][2];
            if a < -0.001 || b < -0.001 {
                error[i] += 0.001;
                temp = std::array::from_fn(|j| data.error_simulation(points[j], &error));
                changed = true;
            }
        }

        let c = if radius_enabled {
            temp[3][2] - temp[0][2]
        } else {
            0.0
        };
        if c < -0.001 {
            error[3] += 0.001;
            temp = std::array::from_fn(|j| data.error_simulation(points[j], &error));
            changed = true;
        } else if c > 0.001 {
            error[3] -= 0.001;
            temp = std::array::from_fn(|j| data.error_simulation(points[j], &error));
            changed = true;
        }

        if count > MAX_ITERATIONS {
            warn!(count, "calibration solver exceeded iteration cap");
            return Err(CalibrationError::NoConvergence);
        }
        count += 1;
        if !changed {
            break;
        }
    }

    if height_enabled {
        error[4] -= temp[3][2];
    }

    let mut result = seed;
    for i in 0..5 {
        result[i] += error[i];
    }

    let min = result[0].min(result[1]).min(result[2]);
    for v in result.iter_mut().take(3) {
        *v -= min;
    }

    debug!(iterations = count, "calibration solver converged");

    Ok(CorrectionResult {
        x: -result[0],
        y: -result[1],
        z: -result[2],
        r: result[3],
        h: result[4],
    })
}

/// Run the full calibration solve from initial endstop adjustments, the
/// current build height, four probed deviations, and the current delta
/// radius. Radius correction is disabled and height correction enabled,
/// matching the default the original tool shipped with.
pub fn calibrate(
    initial_endstop: [f64; 3],
    initial_height: f64,
    probes: ProbeDeviations,
    delta_radius: f64,
) -> Result<CorrectionResult, CalibrationError> {
    let data = CorrectionData {
        tower_adj: [0.0; 6],
        endstop_adj: initial_endstop,
        delta_radius,
    };
    let points = probe_points(probes);
    let seed = [
        -initial_endstop[0],
        -initial_endstop[1],
        -initial_endstop[2],
        delta_radius,
        initial_height,
    ];
    calculate_error(&points, seed, false, true, &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scenario F.
    #[test]
    fn scenario_f_converges_and_resimulates_within_tolerance() {
        let probes = ProbeDeviations {
            tower0: -0.4374,
            tower1: -0.7375,
            tower2: -0.6312,
            centre: 0.0,
        };
        let delta_radius = 96.7;
        let result = calibrate([0.0, 0.0, 0.0], 242.0, probes, delta_radius).unwrap();

        // Re-apply the corrections as the same additive error vector the
        // solver itself converged on (endstop_adj is carried in
        // CorrectionData only as the solver's seed, never read back out by
        // the kinematics — see calculate_error's `seed` parameter).
        let data = CorrectionData {
            tower_adj: [0.0; 6],
            endstop_adj: [0.0; 3],
            delta_radius,
        };
        let error = [
            -result.x,
            -result.y,
            -result.z,
            result.r - delta_radius,
            0.0,
        ];
        let points = probe_points(probes);
        let resimulated: [[f64; 3]; 4] =
            std::array::from_fn(|i| data.error_simulation(points[i], &error));

        // Property 8: re-simulation brings the tower heights within 2x the
        // solver's 0.001 convergence tolerance of one another.
        for i in 0..3 {
            let j = (i + 1) % 3;
            assert!((resimulated[i][2] - resimulated[j][2]).abs() < 0.002);
        }
    }

    #[test]
    fn zero_deviation_probes_yield_zero_endstop_corrections() {
        let probes = ProbeDeviations {
            tower0: 0.0,
            tower1: 0.0,
            tower2: 0.0,
            centre: 0.0,
        };
        let result = calibrate([0.0, 0.0, 0.0], 200.0, probes, 96.7).unwrap();
        assert!((result.x).abs() < 1e-9);
        assert!((result.y).abs() < 1e-9);
        assert!((result.z).abs() < 1e-9);
    }
}
