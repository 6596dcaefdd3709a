//! Mini-batch gradient descent with adaptive moment estimation.
//!
//! The optimizer owns the flat parameter vector for the duration of
//! `minimize` and only hands it back through the objective function and the
//! final return value; the graph keeps the source of truth between steps.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::backend::{Backend, Elm};
use crate::engine::persist::{self, Checkpoint};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct AdaptiveSgdConfig {
    pub epochs: usize,
    pub mini_batch_size: usize,
    pub initial_learning_rate: Elm,
    pub beta1: Elm,
    pub beta2: Elm,
    pub epsilon: Elm,
    /// Cost is printed every this many update steps; 0 disables reporting.
    pub test_frequency: usize,
    /// Parameters and moment estimates are written here after each epoch.
    pub checkpoint: Option<PathBuf>,
    /// Seed for the mini-batch shuffle.
    pub seed: Option<u64>,
}

impl Default for AdaptiveSgdConfig {
    fn default() -> Self {
        AdaptiveSgdConfig {
            epochs: 10,
            mini_batch_size: 32,
            initial_learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            test_frequency: 100,
            checkpoint: None,
            seed: None,
        }
    }
}

#[derive(Debug)]
pub struct AdaptiveSgd {
    config: AdaptiveSgdConfig,
    first_moment: Vec<Elm>,
    second_moment: Vec<Elm>,
    step: u64,
    rng: StdRng,
}

impl AdaptiveSgd {
    pub fn new(config: AdaptiveSgdConfig) -> Result<Self> {
        if config.epochs == 0 || config.mini_batch_size == 0 {
            return Err(Error::config(
                "epochs and mini-batch size must be positive",
            ));
        }
        if config.initial_learning_rate <= 0.0 {
            return Err(Error::config("learning rate must be positive"));
        }
        if !(0.0..1.0).contains(&config.beta1) || !(0.0..1.0).contains(&config.beta2) {
            return Err(Error::config("moment decay rates must lie in [0, 1)"));
        }
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(AdaptiveSgd {
            config,
            first_moment: Vec::new(),
            second_moment: Vec::new(),
            step: 0,
            rng,
        })
    }

    /// Resumes moment estimates and the step counter from a checkpoint.
    /// Returns the checkpointed parameters as the new starting point.
    pub fn restore(&mut self, checkpoint: Checkpoint) -> Vec<Elm> {
        self.first_moment = checkpoint.first_moment;
        self.second_moment = checkpoint.second_moment;
        self.step = checkpoint.step;
        checkpoint.params
    }

    /// Runs mini-batch descent over `data`/`labels` (batch axis 0), calling
    /// `objective` once per mini-batch, and returns the final parameters.
    pub fn minimize<B, F>(
        &mut self,
        mut objective: F,
        params0: Vec<Elm>,
        data: &B::Tensor,
        labels: &B::Tensor,
    ) -> Result<Vec<Elm>>
    where
        B: Backend,
        F: FnMut(&[Elm], &B::Tensor, &B::Tensor) -> Result<(Elm, Vec<Elm>)>,
    {
        let samples = B::shape(data)[0];
        if B::shape(labels)[0] != samples {
            return Err(Error::shape(format!(
                "{} samples but {} labels",
                samples,
                B::shape(labels)[0]
            )));
        }
        let mut params = params0;
        if self.first_moment.len() != params.len() {
            self.first_moment = vec![0.0; params.len()];
            self.second_moment = vec![0.0; params.len()];
        }

        let mut indices: Vec<usize> = (0..samples).collect();
        for epoch in 0..self.config.epochs {
            indices.shuffle(&mut self.rng);
            for chunk in indices.chunks(self.config.mini_batch_size) {
                let batch_data = B::take_rows(data, chunk);
                let batch_labels = B::take_rows(labels, chunk);
                let (cost, grad) = objective(&params, &batch_data, &batch_labels)?;
                if grad.len() != params.len() {
                    return Err(Error::shape(format!(
                        "gradient has {} values, parameters have {}",
                        grad.len(),
                        params.len()
                    )));
                }
                self.update(&mut params, &grad);
                if self.config.test_frequency > 0
                    && self.step % self.config.test_frequency as u64 == 0
                {
                    println!(
                        "epoch {:>3}  step {:>7}  cost {:.6}",
                        epoch, self.step, cost
                    );
                }
            }
            if let Some(path) = &self.config.checkpoint {
                let ck = Checkpoint {
                    step: self.step,
                    params: params.clone(),
                    first_moment: self.first_moment.clone(),
                    second_moment: self.second_moment.clone(),
                };
                persist::write_checkpoint(path, &ck).map_err(|e| {
                    Error::state(format!(
                        "failed to write checkpoint {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(params)
    }

    /// One bias-corrected adaptive update in place.
    fn update(&mut self, params: &mut [Elm], grad: &[Elm]) {
        let c = &self.config;
        self.step += 1;
        let bias1 = 1.0 - c.beta1.powi(self.step as i32);
        let bias2 = 1.0 - c.beta2.powi(self.step as i32);
        for i in 0..params.len() {
            let g = grad[i];
            let m = c.beta1 * self.first_moment[i] + (1.0 - c.beta1) * g;
            let v = c.beta2 * self.second_moment[i] + (1.0 - c.beta2) * g * g;
            self.first_moment[i] = m;
            self.second_moment[i] = v;
            let m_hat = m / bias1;
            let v_hat = v / bias2;
            params[i] -= c.initial_learning_rate * m_hat / (v_hat.sqrt() + c.epsilon);
        }
    }
}
