//! Chaotic particle simulation
//!
//! Movers start at positions and velocities drawn from a ChaCha20
//! stream keyed by the master seed, then move for `iterations` ticks
//! under one of four acceleration laws. After every mover update the
//! IEEE-754 bits of its coordinates (x then y, little-endian) are fed
//! into one SHA-256 accumulator; its final value is the `PathDigest`.
//!
//! Accumulation order is tick-major, mover-minor and single-threaded.
//! Any change to the update rules, draw order or accumulation order
//! changes every digest ever recorded.

use crate::types::{
    MasterSeed, MotionLaw, PathDigest, PointTrace, SimulationParams, Trajectory, Xy,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use std::f64::consts::PI;

/// XOR scramble separating the noise field key from the mover PRNG key
pub const NOISE_SCRAMBLE: u64 = 0x9e37_79b9_7f4a_7c15;

/// Palette cycled across movers
pub const DEFAULT_COLORS: [&str; 20] = [
    "#FF5733", "#33FF57", "#3357FF", "#FF33A8", "#33FFF5", "#F5FF33", "#A833FF", "#FF8C33",
    "#33FF8C", "#8C33FF", "#FF3333", "#33FF33", "#3333FF", "#FF33FF", "#33FFFF", "#FFFF33",
    "#9933FF", "#FF9933", "#33FF99", "#3399FF",
];

/// Digest plus the optional recorded trajectory
#[derive(Debug, Clone)]
pub struct SimulationRun {
    /// Commitment over the whole run
    pub digest: PathDigest,
    /// Per-mover paths (absent for digest-only runs)
    pub trajectory: Option<Trajectory>,
}

/// Run the simulation and record the trajectory
pub fn simulate(seed: MasterSeed, params: &SimulationParams) -> SimulationRun {
    run(seed, params, true)
}

/// Run the simulation keeping only the digest
pub fn path_digest(seed: MasterSeed, params: &SimulationParams) -> PathDigest {
    run(seed, params, false).digest
}

/// 2-D value noise with smoothstep interpolation over an integer lattice
#[derive(Debug, Clone, Copy)]
pub struct ValueNoise {
    seed: i64,
}

impl ValueNoise {
    /// Noise field keyed by `seed`
    pub fn new(seed: i64) -> Self {
        Self { seed }
    }

    fn lattice_hash(&self, x: i64, y: i64) -> i64 {
        let h = x
            .wrapping_mul(374_761_393)
            .wrapping_add(y.wrapping_mul(668_265_263))
            .wrapping_add(self.seed.wrapping_mul(1_274_126_177));
        (h ^ (h >> 13)).wrapping_mul(1_274_126_177)
    }

    fn lattice_value(&self, x: i64, y: i64) -> f64 {
        let v = self.lattice_hash(x, y);
        (v & 0x7fff_ffff) as f64 / 0x7fff_ffff as f64 * 2.0 - 1.0
    }

    /// Sample in `[-1, 1]`
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let xf = x.floor();
        let yf = y.floor();
        let xi = xf as i64;
        let yi = yf as i64;
        let tx = x - xf;
        let ty = y - yf;

        let v00 = self.lattice_value(xi, yi);
        let v10 = self.lattice_value(xi.wrapping_add(1), yi);
        let v01 = self.lattice_value(xi, yi.wrapping_add(1));
        let v11 = self.lattice_value(xi.wrapping_add(1), yi.wrapping_add(1));

        let sx = tx * tx * (3.0 - 2.0 * tx);
        let sy = ty * ty * (3.0 - 2.0 * ty);
        let ix0 = v00 + (v10 - v00) * sx;
        let ix1 = v01 + (v11 - v01) * sx;
        ix0 + (ix1 - ix0) * sy
    }
}

#[derive(Debug, Clone)]
struct Mover {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    path: Vec<Xy>,
}

fn run(seed: MasterSeed, params: &SimulationParams, record: bool) -> SimulationRun {
    let params = params.normalized();
    let width = f64::from(params.canvas_width);
    let height = f64::from(params.canvas_height);
    let motion = &params.motion;

    let mut rng = ChaCha20Rng::seed_from_u64(seed as u64);
    let noise = ValueNoise::new((seed as u64 ^ NOISE_SCRAMBLE) as i64);

    let initial_speed = 2.0 + motion.speed_scale * 2.0;
    let mut movers: Vec<Mover> = (0..params.point_count)
        .map(|_| {
            let x = rng.gen::<f64>() * width;
            let y = rng.gen::<f64>() * height;
            let vx = (rng.gen::<f64>() * 2.0 - 1.0) * initial_speed;
            let vy = (rng.gen::<f64>() * 2.0 - 1.0) * initial_speed;
            Mover {
                x,
                y,
                vx,
                vy,
                path: if record {
                    Vec::with_capacity(params.iterations)
                } else {
                    Vec::new()
                },
            }
        })
        .collect();

    let sharp = motion.sharpness;
    let smooth = motion.smoothness;
    let max_speed = 20.0 * (0.5 + motion.speed_scale);
    let thrust = 0.2 + 0.2 * sharp;
    let damping = 0.98 + 0.01 * smooth;
    let laws = motion.law.laws();

    let mut hasher = Sha256::new();

    for tick in 0..params.iterations {
        let t = tick as f64 * params.step;
        let law = if laws.len() > 1 {
            laws[rng.gen_range(0..laws.len())]
        } else {
            laws[0]
        };

        for m in movers.iter_mut() {
            let (ax, ay) = match law {
                MotionLaw::Sine => (
                    (t + m.x * 0.01).sin() * (0.5 + smooth),
                    (t + m.y * 0.01).cos() * (0.5 + smooth),
                ),
                MotionLaw::Jerk => {
                    if rng.gen::<f64>() < 0.02 * (0.5 + sharp) {
                        let angle = rng.gen::<f64>() * 2.0 * PI;
                        let impulse = 6.0 * (0.5 + sharp);
                        (impulse * angle.cos(), impulse * angle.sin())
                    } else {
                        (0.0, 0.0)
                    }
                }
                MotionLaw::Spiral => {
                    let angle = (height / 2.0 - m.y).atan2(width / 2.0 - m.x);
                    let radial = (0.8 + smooth) * 1.2;
                    let tangential = (0.5 + sharp) * 1.2;
                    (
                        radial * angle.cos() - tangential * angle.sin(),
                        radial * angle.sin() + tangential * angle.cos(),
                    )
                }
                MotionLaw::Flow => (
                    noise.sample(m.x * 0.006 + t, m.y * 0.006) * (1.0 + smooth),
                    noise.sample(m.y * 0.006 - t, m.x * 0.006) * (1.0 + smooth),
                ),
            };

            m.vx = (m.vx + ax * thrust) * damping;
            m.vy = (m.vy + ay * thrust) * damping;

            let speed = m.vx.hypot(m.vy);
            if speed > max_speed {
                let scale = max_speed / speed;
                m.vx *= scale;
                m.vy *= scale;
            }

            m.x += m.vx;
            m.y += m.vy;

            if m.x < 0.0 {
                m.x = 0.0;
                m.vx = -m.vx;
            }
            if m.y < 0.0 {
                m.y = 0.0;
                m.vy = -m.vy;
            }
            if m.x > width {
                m.x = width;
                m.vx = -m.vx;
            }
            if m.y > height {
                m.y = height;
                m.vy = -m.vy;
            }

            if record {
                m.path.push(Xy { x: m.x, y: m.y });
            }

            hasher.update(m.x.to_bits().to_le_bytes());
            hasher.update(m.y.to_bits().to_le_bytes());
        }
    }

    let digest = PathDigest::from_bytes(hasher.finalize().into());
    let trajectory = record.then(|| Trajectory {
        canvas_width: params.canvas_width,
        canvas_height: params.canvas_height,
        points: movers
            .into_iter()
            .enumerate()
            .map(|(id, m)| PointTrace {
                id,
                color: DEFAULT_COLORS[id % DEFAULT_COLORS.len()].to_string(),
                pixel_width: params.pixel_width,
                path: m.path,
            })
            .collect(),
    });

    SimulationRun { digest, trajectory }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MotionParams, MotionSelection};

    fn params(law: &str, points: usize, iterations: usize) -> SimulationParams {
        SimulationParams {
            point_count: points,
            iterations,
            canvas_width: 256,
            canvas_height: 128,
            pixel_width: 2,
            step: 0.01,
            motion: MotionParams {
                law: MotionSelection::parse(law),
                ..MotionParams::default()
            },
        }
    }

    #[test]
    fn test_same_inputs_same_digest() {
        for law in ["flow", "sine", "jerk", "spiral", "random", "sine,jerk"] {
            let p = params(law, 5, 200);
            assert_eq!(path_digest(42, &p), path_digest(42, &p), "law {law}");
        }
    }

    #[test]
    fn test_seed_and_params_change_digest() {
        let p = params("flow", 3, 10);
        let base = path_digest(42, &p);
        assert_ne!(base, path_digest(43, &p));
        assert_ne!(base, path_digest(-42, &p));
        assert_ne!(base, path_digest(42, &params("flow", 4, 10)));
        assert_ne!(base, path_digest(42, &params("flow", 3, 11)));
        assert_ne!(base, path_digest(42, &params("sine", 3, 10)));
    }

    #[test]
    fn test_recorded_run_matches_digest_only_run() {
        let p = params("random", 4, 50);
        let run = simulate(7, &p);
        assert_eq!(run.digest, path_digest(7, &p));

        let trajectory = run.trajectory.unwrap();
        assert_eq!(trajectory.points.len(), 4);
        assert!(trajectory.points.iter().all(|pt| pt.path.len() == 50));
        assert_eq!(trajectory.points[1].color, DEFAULT_COLORS[1]);
        assert_eq!(trajectory.points[0].pixel_width, 2);
    }

    #[test]
    fn test_digest_commits_to_every_coordinate() {
        let p = params("spiral", 2, 5);
        let run = simulate(99, &p);
        let trajectory = run.trajectory.unwrap();

        let mut hasher = Sha256::new();
        for tick in 0..5 {
            for point in &trajectory.points {
                let xy = point.path[tick];
                hasher.update(xy.x.to_bits().to_le_bytes());
                hasher.update(xy.y.to_bits().to_le_bytes());
            }
        }
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(run.digest.as_bytes(), &expected);
    }

    #[test]
    fn test_positions_stay_on_canvas() {
        let mut p = params("jerk", 10, 500);
        p.motion.sharpness = 2.0;
        p.motion.speed_scale = 3.0;
        let trajectory = simulate(1, &p).trajectory.unwrap();
        for point in &trajectory.points {
            for xy in &point.path {
                assert!((0.0..=256.0).contains(&xy.x));
                assert!((0.0..=128.0).contains(&xy.y));
            }
        }
    }

    #[test]
    fn test_out_of_range_params_are_normalized() {
        let mut wild = params("flow", 3, 10);
        wild.step = 0.0;
        wild.motion.sharpness = 50.0;
        let mut tame = wild.clone();
        tame.step = SimulationParams::DEFAULT_STEP;
        tame.motion.sharpness = 2.0;
        assert_eq!(path_digest(5, &wild), path_digest(5, &tame));
    }

    #[test]
    fn test_noise_is_bounded_and_continuous() {
        let noise = ValueNoise::new(12345);
        for i in 0..200 {
            let x = i as f64 * 0.37 - 20.0;
            let v = noise.sample(x, x * 0.5);
            assert!((-1.0..=1.0).contains(&v));
        }
        let a = noise.sample(3.0, 4.0);
        let b = noise.sample(3.0 + 1e-9, 4.0);
        assert!((a - b).abs() < 1e-6);
    }
}
