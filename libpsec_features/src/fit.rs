//! Sum-of-Gaussians fitting of a single channel waveform.
//!
//! A signal travelling along an anode strip is read out at both ends, so a channel
//! sees two negative lobes whose separation encodes where the photon hit the tile.
//! The fitter seeds one lobe at each half-maximum edge and minimises the sum of
//! squared residuals with a Levenberg-Marquardt iteration.
//!
//! The fitted lobes come back in no particular time order. Use
//! [`FitResult::arrival_time`] and [`FitResult::time_difference`] rather than
//! indexing the lobes directly.
use ndarray::{Array1, Array2, ArrayView1};

use super::config::FitConfig;
use super::error::FitError;
use super::pulse::{first_crossing, last_crossing};

const INITIAL_DAMPING: f64 = 1.0e-3;
const MAX_DAMPING: f64 = 1.0e20;
const MIN_SCALE: f64 = 1.0e-12;
const PIVOT_EPSILON: f64 = 1.0e-300;

/// One Gaussian lobe `height * exp(-(t - center)^2 / (2 width^2))`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianLobe {
    pub height: f64,
    pub center: f64,
    pub width: f64,
}

impl GaussianLobe {
    pub fn new(height: f64, center: f64, width: f64) -> Self {
        Self {
            height,
            center,
            width,
        }
    }

    pub fn value(&self, t: f64) -> f64 {
        let dt = t - self.center;
        self.height * (-dt * dt / (2.0 * self.width * self.width)).exp()
    }
}

/// A sum of Gaussian lobes with an optional constant offset
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianModel {
    pub lobes: Vec<GaussianLobe>,
    pub offset: Option<f64>,
}

impl GaussianModel {
    pub fn new(lobes: Vec<GaussianLobe>, offset: Option<f64>) -> Self {
        Self { lobes, offset }
    }

    fn n_parameters(&self) -> usize {
        3 * self.lobes.len() + usize::from(self.offset.is_some())
    }

    /// Flatten to `[h1, c1, w1, h2, c2, w2, ..., offset]`
    fn to_parameters(&self) -> Array1<f64> {
        let mut params = Vec::with_capacity(self.n_parameters());
        for lobe in self.lobes.iter() {
            params.extend([lobe.height, lobe.center, lobe.width]);
        }
        if let Some(offset) = self.offset {
            params.push(offset);
        }
        Array1::from(params)
    }

    fn from_parameters(params: &Array1<f64>, n_lobes: usize, has_offset: bool) -> Self {
        let lobes = (0..n_lobes)
            .map(|k| GaussianLobe::new(params[3 * k], params[3 * k + 1], params[3 * k + 2]))
            .collect();
        let offset = if has_offset {
            Some(params[3 * n_lobes])
        } else {
            None
        };
        Self { lobes, offset }
    }

    pub fn value(&self, t: f64) -> f64 {
        self.lobes.iter().map(|lobe| lobe.value(t)).sum::<f64>() + self.offset.unwrap_or(0.0)
    }

    pub fn evaluate(&self, times: ArrayView1<'_, f64>) -> Array1<f64> {
        times.mapv(|t| self.value(t))
    }

    /// Residuals `model - observed` and their Jacobian with respect to the parameters
    fn linearize(
        &self,
        times: ArrayView1<'_, f64>,
        waveform: ArrayView1<'_, f64>,
    ) -> (Array2<f64>, Array1<f64>) {
        let n_params = self.n_parameters();
        let mut jacobian = Array2::zeros((times.len(), n_params));
        let mut residuals = Array1::zeros(times.len());
        for (row, (t, y)) in times.iter().zip(waveform.iter()).enumerate() {
            let mut model = self.offset.unwrap_or(0.0);
            for (k, lobe) in self.lobes.iter().enumerate() {
                let dt = t - lobe.center;
                let w2 = lobe.width * lobe.width;
                let e = (-dt * dt / (2.0 * w2)).exp();
                model += lobe.height * e;
                jacobian[[row, 3 * k]] = e;
                jacobian[[row, 3 * k + 1]] = lobe.height * e * dt / w2;
                jacobian[[row, 3 * k + 2]] = lobe.height * e * dt * dt / (w2 * lobe.width);
            }
            if self.offset.is_some() {
                jacobian[[row, n_params - 1]] = 1.0;
            }
            residuals[row] = model - y;
        }
        (jacobian, residuals)
    }
}

/// Normalised chi-square `mean((obs - model)^2 / |obs|)`.
///
/// Samples where either the observation or the model is exactly zero are left out.
/// Returns None if no sample is left.
pub fn chi_square(observed: ArrayView1<'_, f64>, expected: ArrayView1<'_, f64>) -> Option<f64> {
    let (sum, count) = observed
        .iter()
        .zip(expected.iter())
        .filter(|(obs, gen)| **obs != 0.0 && **gen != 0.0)
        .fold((0.0, 0usize), |(sum, count), (obs, gen)| {
            (sum + (obs - gen).powi(2) / obs.abs(), count + 1)
        });
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Seed the fit with one lobe at each half-maximum edge.
///
/// Half maximum is `0.5 * min(waveform)`. The first lobe sits at the first sample below
/// it scanning forward, the second at the first sample below it scanning backward from
/// the end. A third lobe, if requested, sits at the minimum. All widths start at
/// `width`.
pub fn initial_guess(
    waveform: ArrayView1<'_, f64>,
    times: ArrayView1<'_, f64>,
    n_lobes: usize,
    width: f64,
    offset: Option<f64>,
) -> Result<GaussianModel, FitError> {
    if waveform.len() != times.len() {
        return Err(FitError::LengthMismatch(waveform.len(), times.len()));
    }
    let (min_index, min_value) = waveform
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best_i, best_v), (i, v)| {
            if *v < best_v {
                (i, *v)
            } else {
                (best_i, best_v)
            }
        });
    let half_max = 0.5 * min_value;
    let leading = first_crossing(waveform, half_max).ok_or(FitError::NoPulse)?;
    let trailing = last_crossing(waveform, half_max).ok_or(FitError::NoPulse)?;

    let mut lobes = vec![
        GaussianLobe::new(half_max, times[leading], width),
        GaussianLobe::new(half_max, times[trailing], width),
    ];
    if n_lobes >= 3 {
        lobes.push(GaussianLobe::new(half_max, times[min_index], width));
    }
    Ok(GaussianModel::new(lobes, offset))
}

/// Outcome of a converged fit
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub model: GaussianModel,
    pub chi_square: Option<f64>,
    pub cost: f64,
    pub iterations: usize,
}

impl FitResult {
    /// Earliest of the two edge lobe centres, in the time units of the fit
    pub fn arrival_time(&self) -> f64 {
        let (a, b) = self.edge_centers();
        a.min(b)
    }

    /// Absolute separation of the two edge lobe centres
    pub fn time_difference(&self) -> f64 {
        let (a, b) = self.edge_centers();
        (a - b).abs()
    }

    fn edge_centers(&self) -> (f64, f64) {
        (self.model.lobes[0].center, self.model.lobes[1].center)
    }
}

fn cost_of(model: &GaussianModel, times: ArrayView1<'_, f64>, waveform: ArrayView1<'_, f64>) -> f64 {
    0.5 * times
        .iter()
        .zip(waveform.iter())
        .map(|(t, y)| (model.value(*t) - y).powi(2))
        .sum::<f64>()
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting
fn solve_linear(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|i, j| a[[*i, col]].abs().total_cmp(&a[[*j, col]].abs()))?;
        if !(a[[pivot, col]].abs() > PIVOT_EPSILON) {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}

/// Levenberg-Marquardt fitter for sums of Gaussian lobes
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianFitter {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for GaussianFitter {
    fn default() -> Self {
        Self::new(&FitConfig::default())
    }
}

impl GaussianFitter {
    pub fn new(config: &FitConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        }
    }

    /// Minimise the squared residuals between `guess` and `waveform`.
    ///
    /// Converges when the relative cost reduction, the step size or the remaining cost
    /// (relative to the waveform energy) falls below tolerance. Anything else is a
    /// [`FitError::NonConvergence`], never a best-effort answer.
    pub fn fit(
        &self,
        waveform: ArrayView1<'_, f64>,
        times: ArrayView1<'_, f64>,
        guess: GaussianModel,
    ) -> Result<FitResult, FitError> {
        if waveform.len() != times.len() {
            return Err(FitError::LengthMismatch(waveform.len(), times.len()));
        }
        if guess.lobes.len() < 2 {
            return Err(FitError::TooFewLobes(guess.lobes.len()));
        }
        let n_lobes = guess.lobes.len();
        let has_offset = guess.offset.is_some();
        let n_params = guess.n_parameters();
        let energy = 0.5 * waveform.dot(&waveform);

        let mut model = guess;
        let mut params = model.to_parameters();
        let mut cost = cost_of(&model, times, waveform);
        let mut damping = INITIAL_DAMPING;
        let mut growth = 2.0;

        for iteration in 0..self.max_iterations {
            let (jacobian, residuals) = model.linearize(times, waveform);
            let jtj = jacobian.t().dot(&jacobian);
            let gradient = jacobian.t().dot(&residuals);
            let scale = jtj.diag().mapv(|d| d.max(MIN_SCALE));

            loop {
                let mut damped = jtj.clone();
                for i in 0..n_params {
                    damped[[i, i]] += damping * scale[i];
                }
                let step = match solve_linear(damped, -&gradient) {
                    Some(step) => step,
                    None => {
                        damping *= growth;
                        growth *= 2.0;
                        if damping > MAX_DAMPING {
                            return Err(FitError::NonConvergence {
                                iterations: iteration,
                                cost,
                            });
                        }
                        continue;
                    }
                };

                let step_norm = step.dot(&step).sqrt();
                let param_norm = params.dot(&params).sqrt();
                if step_norm <= self.tolerance * (param_norm + self.tolerance) {
                    return Self::finish(model, cost, iteration, times, waveform);
                }

                let trial_params = &params + &step;
                let trial = GaussianModel::from_parameters(&trial_params, n_lobes, has_offset);
                let trial_cost = cost_of(&trial, times, waveform);
                let predicted = 0.5 * step.dot(&(&(&step * &scale) * damping - &gradient));

                if trial_cost.is_finite() && predicted > 0.0 && trial_cost < cost {
                    let ratio = (cost - trial_cost) / predicted;
                    let reduction = cost - trial_cost;
                    let previous = cost;
                    params = trial_params;
                    model = trial;
                    cost = trial_cost;
                    damping *= (1.0_f64 / 3.0).max(1.0 - (2.0 * ratio - 1.0).powi(3));
                    growth = 2.0;
                    if reduction <= self.tolerance * previous || cost <= f64::EPSILON * energy {
                        return Self::finish(model, cost, iteration + 1, times, waveform);
                    }
                    break;
                }

                damping *= growth;
                growth *= 2.0;
                if damping > MAX_DAMPING {
                    return Err(FitError::NonConvergence {
                        iterations: iteration,
                        cost,
                    });
                }
            }
        }

        Err(FitError::NonConvergence {
            iterations: self.max_iterations,
            cost,
        })
    }

    fn finish(
        mut model: GaussianModel,
        cost: f64,
        iterations: usize,
        times: ArrayView1<'_, f64>,
        waveform: ArrayView1<'_, f64>,
    ) -> Result<FitResult, FitError> {
        for lobe in model.lobes.iter_mut() {
            // Only width^2 enters the model
            lobe.width = lobe.width.abs();
        }
        let all_finite = model
            .lobes
            .iter()
            .all(|l| l.height.is_finite() && l.center.is_finite() && l.width.is_finite())
            && model.offset.map_or(true, f64::is_finite);
        if !all_finite || !cost.is_finite() {
            return Err(FitError::NonFinite);
        }
        let fitted = model.evaluate(times);
        let chi_square = chi_square(waveform, fitted.view());
        Ok(FitResult {
            model,
            chi_square,
            cost,
            iterations,
        })
    }
}
