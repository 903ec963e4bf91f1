//! Kalman Filter Bank - one adaptive filter per (symbol, source)
//!
//! Single-state path smooths the price level alone. The optional
//! multi-state path tracks `[price, velocity, acceleration]` with a
//! constant-acceleration model. Both adapt their measurement and process
//! noise online from innovation statistics.
//!
//! Matrices are plain `[[f64; 3]; 3]` arrays; dimensionality never varies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::FilterConfig;

/// Floor for covariances and denominators
const EPSILON: f64 = 1e-9;

/// Initial diagonal of the 3-state covariance
const MULTI_STATE_INITIAL_COV: [f64; 3] = [1.0, 0.1, 0.01];

type Vec3 = [f64; 3];
type Mat3 = [[f64; 3]; 3];

fn identity() -> Mat3 {
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
}

fn mat_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn mat_vec(a: &Mat3, v: &Vec3) -> Vec3 {
    let mut out = [0.0; 3];
    for i in 0..3 {
        out[i] = (0..3).map(|k| a[i][k] * v[k]).sum();
    }
    out
}

fn transpose(a: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[j][i] = a[i][j];
        }
    }
    out
}

fn mat_add(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = a[i][j] + b[i][j];
        }
    }
    out
}

fn mat_sub(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = a[i][j] - b[i][j];
        }
    }
    out
}

/// Constant-acceleration transition matrix F
fn transition(dt: f64) -> Mat3 {
    [
        [1.0, dt, dt * dt / 2.0],
        [0.0, 1.0, dt],
        [0.0, 0.0, 1.0],
    ]
}

/// Continuous white-noise-acceleration process noise scaled by `q`
fn process_noise_matrix(q: f64, dt: f64) -> Mat3 {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt3 * dt;
    [
        [q * dt4 / 4.0, q * dt3 / 2.0, q * dt2 / 2.0],
        [q * dt3 / 2.0, q * dt2, q * dt],
        [q * dt2 / 2.0, q * dt, q],
    ]
}

/// Keep the covariance symmetric with a positive diagonal
fn condition(mut p: Mat3) -> Mat3 {
    for i in 0..3 {
        for j in (i + 1)..3 {
            let avg = (p[i][j] + p[j][i]) / 2.0;
            p[i][j] = avg;
            p[j][i] = avg;
        }
        if !(p[i][i] >= EPSILON) {
            p[i][i] = EPSILON;
        }
    }
    p
}

/// Online noise estimates owned by one filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseParams {
    pub measurement_noise: f64,
    pub process_noise: f64,
    pub adaptation_rate: f64,
    pub last_innovation: f64,
    pub innovation_variance: f64,
    pub update_count: u64,
}

impl NoiseParams {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            measurement_noise: config.measurement_noise,
            process_noise: config.process_noise,
            adaptation_rate: config.adaptation_rate,
            last_innovation: 0.0,
            innovation_variance: 0.0,
            update_count: 0,
        }
    }

    /// Blend innovation-derived noise candidates into the current estimates
    fn adapt(&mut self, innovation: f64, predicted_cov: f64, time_scale: f64, config: &FilterConfig) {
        let rate = self.adaptation_rate;
        self.update_count += 1;
        self.innovation_variance =
            self.innovation_variance * (1.0 - rate) + innovation * innovation * rate;

        // Observed innovation variance minus what the prediction explains
        let r_candidate = (self.innovation_variance - predicted_cov).clamp(
            config.measurement_noise * config.min_noise_factor,
            config.measurement_noise * config.max_noise_factor,
        );

        // Innovation beyond one predicted standard deviation implies missing process noise
        let excess = (innovation.abs() - predicted_cov.max(0.0).sqrt()).max(0.0);
        let q_candidate = (excess * excess * time_scale).clamp(
            config.process_noise * config.min_noise_factor,
            config.process_noise * config.max_noise_factor,
        );

        self.measurement_noise = self.measurement_noise * (1.0 - rate) + r_candidate * rate;
        self.process_noise = self.process_noise * (1.0 - rate) + q_candidate * rate;
        self.last_innovation = innovation;
    }
}

/// 3-state extension: price, velocity, acceleration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultiState {
    pub state: [f64; 3],
    pub covariance: [[f64; 3]; 3],
    pub last_update: i64,
    pub noise_params: NoiseParams,
}

impl MultiState {
    fn new(price: f64, timestamp: i64, noise_params: NoiseParams) -> Self {
        let mut covariance = [[0.0; 3]; 3];
        for (i, value) in MULTI_STATE_INITIAL_COV.iter().enumerate() {
            covariance[i][i] = *value;
        }
        Self {
            state: [price, 0.0, 0.0],
            covariance,
            last_update: timestamp,
            noise_params,
        }
    }

    /// Predict + update; returns (innovation, predicted price variance)
    fn step(&mut self, price: f64, dt: f64, noise: &NoiseParams) -> (f64, f64) {
        let f = transition(dt);
        let q = process_noise_matrix(noise.process_noise, dt);

        let x_pred = mat_vec(&f, &self.state);
        let p_pred = mat_add(&mat_mul(&mat_mul(&f, &self.covariance), &transpose(&f)), &q);

        // H = [1, 0, 0]
        let innovation = price - x_pred[0];
        let s = (p_pred[0][0] + noise.measurement_noise).max(EPSILON);
        let gain = [p_pred[0][0] / s, p_pred[1][0] / s, p_pred[2][0] / s];

        for i in 0..3 {
            self.state[i] = x_pred[i] + gain[i] * innovation;
        }

        let mut kh = [[0.0; 3]; 3];
        for i in 0..3 {
            kh[i][0] = gain[i];
        }
        self.covariance = condition(mat_mul(&mat_sub(&identity(), &kh), &p_pred));

        (innovation, p_pred[0][0].max(0.0))
    }
}

/// Filter state for one (symbol, source) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalmanState {
    pub estimate: f64,
    pub error_covariance: f64,
    pub last_update: i64,
    pub noise_params: NoiseParams,
    pub multi_state: Option<MultiState>,
}

impl KalmanState {
    pub fn new(price: f64, timestamp: i64, config: &FilterConfig, multi_state: bool) -> Self {
        let noise_params = NoiseParams::new(config);
        Self {
            estimate: price,
            error_covariance: 1.0,
            last_update: timestamp,
            noise_params,
            multi_state: multi_state.then(|| MultiState::new(price, timestamp, noise_params)),
        }
    }

    /// Feed one measurement; returns the filtered price
    pub fn update(&mut self, price: f64, timestamp: i64, config: &FilterConfig) -> f64 {
        let dt = ((timestamp - self.last_update) as f64 / 1000.0).max(0.0);
        let time_scale = (dt / 60.0).min(1.0);

        let (innovation, predicted_cov) = match self.multi_state.take() {
            Some(mut multi) => {
                let out = multi.step(price, dt, &self.noise_params);
                self.estimate = multi.state[0];
                self.error_covariance = multi.covariance[0][0];
                self.multi_state = Some(multi);
                out
            }
            None => self.single_step(price, time_scale),
        };

        self.noise_params
            .adapt(innovation, predicted_cov, time_scale, config);

        if let Some(multi) = self.multi_state.as_mut() {
            multi.noise_params = self.noise_params;
            multi.last_update = timestamp;
        }
        self.last_update = timestamp;
        self.estimate
    }

    fn single_step(&mut self, price: f64, time_scale: f64) -> (f64, f64) {
        let noise = &self.noise_params;
        let predicted_cov = self.error_covariance + noise.process_noise * time_scale;
        let innovation = price - self.estimate;
        let gain = predicted_cov / (predicted_cov + noise.measurement_noise).max(EPSILON);

        self.estimate += gain * innovation;
        self.error_covariance = ((1.0 - gain) * predicted_cov).max(EPSILON);
        (innovation, predicted_cov)
    }

    /// `max(0, 1 - errorCovariance)`
    pub fn kalman_confidence(&self) -> f64 {
        (1.0 - self.error_covariance).max(0.0)
    }

    /// Innovation variance normalised by a fixed multiple of the base measurement noise
    pub fn innovation_confidence(&self, base_measurement_noise: f64) -> f64 {
        (1.0 - self.noise_params.innovation_variance / (base_measurement_noise * 100.0)).max(0.0)
    }
}

/// Per-symbol bank of source filters
#[derive(Debug, Clone)]
pub struct FilterBank {
    config: FilterConfig,
    multi_state: bool,
    filters: HashMap<String, KalmanState>,
}

impl FilterBank {
    pub fn new(config: FilterConfig, multi_state: bool) -> Self {
        Self {
            config,
            multi_state,
            filters: HashMap::new(),
        }
    }

    /// Filter a quote, creating the source's filter on first sight
    pub fn update(&mut self, source: &str, price: f64, timestamp: i64) -> f64 {
        match self.filters.get_mut(source) {
            Some(state) => state.update(price, timestamp, &self.config),
            None => {
                let state = KalmanState::new(price, timestamp, &self.config, self.multi_state);
                let estimate = state.estimate;
                self.filters.insert(source.to_string(), state);
                estimate
            }
        }
    }

    pub fn get(&self, source: &str) -> Option<&KalmanState> {
        self.filters.get(source)
    }

    /// Zero for sources without a filter yet
    pub fn kalman_confidence(&self, source: &str) -> f64 {
        self.filters
            .get(source)
            .map(KalmanState::kalman_confidence)
            .unwrap_or(0.0)
    }

    pub fn innovation_confidence(&self, source: &str) -> f64 {
        self.filters
            .get(source)
            .map(|s| s.innovation_confidence(self.config.measurement_noise))
            .unwrap_or(0.0)
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn fixed_noise() -> FilterConfig {
        FilterConfig {
            adaptation_rate: 0.0,
            ..FilterConfig::default()
        }
    }

    #[test]
    fn test_initialization() {
        let config = FilterConfig::default();
        let state = KalmanState::new(42.0, 1_000, &config, false);
        assert_eq!(state.estimate, 42.0);
        assert_eq!(state.error_covariance, 1.0);
        assert_eq!(state.noise_params.measurement_noise, 0.1);
        assert_eq!(state.noise_params.process_noise, 0.001);
        assert_eq!(state.noise_params.adaptation_rate, 0.1);
        assert!(state.multi_state.is_none());

        let multi = KalmanState::new(42.0, 1_000, &config, true);
        let m = multi.multi_state.unwrap();
        assert_eq!(m.state, [42.0, 0.0, 0.0]);
        assert_eq!(m.covariance[0][0], 1.0);
        assert_eq!(m.covariance[1][1], 0.1);
        assert_eq!(m.covariance[2][2], 0.01);
    }

    #[test]
    fn test_first_quote_passes_through() {
        let mut bank = FilterBank::new(FilterConfig::default(), false);
        assert_eq!(bank.update("binance", 10.5, 0), 10.5);
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.kalman_confidence("binance"), 0.0);
        assert_eq!(bank.kalman_confidence("unknown"), 0.0);
    }

    #[test]
    fn test_converges_to_constant_price() {
        let config = FilterConfig::default();
        let mut state = KalmanState::new(99.0, 0, &config, false);

        let mut estimate = 0.0;
        for i in 1..=50 {
            estimate = state.update(100.0, i * 1_000, &config);
        }
        assert!((estimate - 100.0).abs() < 0.01, "estimate {estimate}");
    }

    #[test]
    fn test_covariance_non_increasing_with_fixed_noise() {
        let config = fixed_noise();
        let mut state = KalmanState::new(100.0, 0, &config, false);

        let mut previous = state.error_covariance;
        for i in 1..=40 {
            state.update(100.0, i * 1_000, &config);
            assert!(
                state.error_covariance <= previous,
                "covariance grew at step {i}: {} > {previous}",
                state.error_covariance
            );
            previous = state.error_covariance;
        }
        assert_eq!(state.noise_params.measurement_noise, 0.1);
        assert_eq!(state.noise_params.update_count, 40);
    }

    #[test]
    fn test_zero_dt_is_finite() {
        let config = FilterConfig::default();
        for multi in [false, true] {
            let mut state = KalmanState::new(100.0, 5_000, &config, multi);
            for _ in 0..20 {
                let estimate = state.update(101.0, 5_000, &config);
                assert!(estimate.is_finite());
                assert!(state.error_covariance > 0.0);
            }
            // out-of-order timestamps are treated as dt = 0
            assert!(state.update(99.0, 1_000, &config).is_finite());
        }
    }

    #[test]
    fn test_multi_state_estimate_matches_state() {
        let config = FilterConfig::default();
        let mut state = KalmanState::new(100.0, 0, &config, true);
        for i in 1..=30 {
            let price = 100.0 + i as f64 * 0.5;
            let estimate = state.update(price, i * 1_000, &config);
            let multi = state.multi_state.unwrap();
            assert_eq!(estimate, multi.state[0]);
            assert_eq!(state.error_covariance, multi.covariance[0][0]);
            assert_eq!(multi.noise_params, state.noise_params);
            assert_eq!(multi.last_update, i * 1_000);
        }
    }

    #[test]
    fn test_multi_state_tracks_trend() {
        let config = FilterConfig::default();
        let mut state = KalmanState::new(100.0, 0, &config, true);
        for i in 1..=60 {
            state.update(100.0 + i as f64, i * 1_000, &config);
        }
        let velocity = state.multi_state.unwrap().state[1];
        assert!(velocity > 0.5, "velocity {velocity}");
        assert!((state.estimate - 160.0).abs() < 2.0);
    }

    #[test]
    fn test_noise_stays_within_bounds() {
        let config = FilterConfig::default();
        let mut state = KalmanState::new(100.0, 0, &config, false);
        for i in 1..=200 {
            let price = if i % 2 == 0 { 50.0 } else { 500.0 };
            state.update(price, i * 60_000, &config);
            let noise = state.noise_params;
            assert!(noise.measurement_noise >= config.measurement_noise * 0.01 - 1e-12);
            assert!(noise.measurement_noise <= config.measurement_noise * 100.0 + 1e-12);
            assert!(noise.process_noise >= config.process_noise * 0.01 - 1e-12);
            assert!(noise.process_noise <= config.process_noise * 100.0 + 1e-12);
        }
        assert!(state.noise_params.measurement_noise > config.measurement_noise);
        assert!(state.innovation_confidence(config.measurement_noise) < 0.5);
    }

    #[test]
    fn test_covariance_stays_positive_under_noise() {
        let config = FilterConfig::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for multi in [false, true] {
            let mut state = KalmanState::new(100.0, 0, &config, multi);
            let mut ts = 0;
            for _ in 0..500 {
                ts += rng.gen_range(0..120_000);
                let price = 100.0 * (1.0 + rng.gen_range(-0.05..0.05));
                let estimate = state.update(price, ts, &config);
                assert!(estimate.is_finite());
                assert!(state.error_covariance > 0.0);
                if let Some(m) = state.multi_state {
                    for i in 0..3 {
                        assert!(m.covariance[i][i] > 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_innovation_confidence_uses_base_noise() {
        let config = FilterConfig::default();
        let mut state = KalmanState::new(100.0, 0, &config, false);
        state.noise_params.innovation_variance = 5.0;
        state.noise_params.measurement_noise = 3.0;
        // normalised by base 0.1 * 100, not the adapted 3.0
        assert!((state.innovation_confidence(0.1) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_matrix_helpers() {
        let a = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        assert_eq!(mat_mul(&a, &identity()), a);
        assert_eq!(transpose(&transpose(&a)), a);
        assert_eq!(transpose(&a)[0][2], 7.0);
        assert_eq!(mat_vec(&transition(2.0), &[1.0, 1.0, 1.0]), [5.0, 3.0, 1.0]);
        let q = process_noise_matrix(1.0, 2.0);
        assert_eq!(q[0][0], 4.0);
        assert_eq!(q[0][1], 4.0);
        assert_eq!(q[0][2], 2.0);
        assert_eq!(q[2][2], 1.0);
    }
}
