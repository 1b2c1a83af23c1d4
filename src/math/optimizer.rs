// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Guiding trait to implement iterative optimization algorithms.

/// Returned by `stop_criterion` to tell if iterations should continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continue {
    /// Stop iterations.
    Stop,
    /// Continue iterations.
    Forward,
}

/// Skeleton of an iterative optimizer.
///
/// * `Observations`: the data the energy is evaluated against.
///   It is never modified during iterations.
/// * `EvalState`: result of evaluating a candidate model.
///   It may be partial when the candidate is going to be rejected anyway.
/// * `Model`: what is being optimized.
/// * `Error`: failures aborting the optimization.
///
/// Implementors hold everything else (damping, energy, iteration budget)
/// and decide in `stop_criterion` which state is kept.
pub trait State<Observations, EvalState, Model, Error>
where
    Self: Sized,
{
    /// Initialize the optimizer state from an initial model.
    fn init(obs: &Observations, model: Model) -> Result<Self, Error>;

    /// Compute the candidate model of the next iteration.
    /// May update the state, for example to increase a damping factor
    /// until the step becomes computable.
    fn step(&mut self) -> Result<Model, Error>;

    /// Evaluate a candidate model.
    fn eval(&self, obs: &Observations, model: Model) -> EvalState;

    /// Decide if iterations should continue,
    /// and return the state kept for the next iteration (or the final one).
    fn stop_criterion(
        self,
        obs: &Observations,
        nb_iter: usize,
        eval_state: EvalState,
    ) -> Result<(Self, Continue), Error>;

    /// Iterate until `stop_criterion` says so.
    /// Returns the final state and the number of iterations.
    fn iterative_solve(obs: &Observations, initial_model: Model) -> Result<(Self, usize), Error> {
        let mut state = Self::init(obs, initial_model)?;
        let mut nb_iter = 0;
        loop {
            nb_iter += 1;
            let model = state.step()?;
            let eval_state = state.eval(obs, model);
            let (kept_state, continuation) = state.stop_criterion(obs, nb_iter, eval_state)?;
            state = kept_state;
            if continuation == Continue::Stop {
                return Ok((state, nb_iter));
            }
        }
    }
}

// TESTS #############################################################
