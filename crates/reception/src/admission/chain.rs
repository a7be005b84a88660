//! Ordered stage lists.
//!
//! A [`Chain`] is data: a list of named stage functions run in order. Each
//! stage gets the shared dependencies, the request, and the context produced
//! by the previous stage, and either continues with a new context or halts
//! with a final result. If every stage continues, the chain's `finish`
//! function turns the last context into the result.

use futures::future::BoxFuture;

/// What a stage decided.
#[derive(Debug)]
pub enum StageOutcome<C, O> {
    /// Pass this context to the next stage
    Continue(C),
    /// Stop with this result
    Halt(O),
}

/// A stage body.
pub type StageFn<D, R, C, O> = for<'a> fn(&'a D, &'a R, C) -> BoxFuture<'a, StageOutcome<C, O>>;

pub struct Stage<D, R, C, O> {
    pub name: &'static str,
    pub run: StageFn<D, R, C, O>,
}

impl<D, R, C, O> Clone for Stage<D, R, C, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D, R, C, O> Copy for Stage<D, R, C, O> {}

pub struct Chain<D, R, C, O> {
    name: &'static str,
    stages: Vec<Stage<D, R, C, O>>,
    finish: fn(C) -> O,
}

impl<D, R, C, O> Chain<D, R, C, O> {
    pub fn new(name: &'static str, finish: fn(C) -> O) -> Self {
        Self {
            name,
            stages: Vec::new(),
            finish,
        }
    }

    /// Appends a stage.
    pub fn stage(mut self, name: &'static str, run: StageFn<D, R, C, O>) -> Self {
        self.stages.push(Stage { name, run });
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name).collect()
    }

    /// Runs the stages in order, stopping at the first halt.
    pub async fn run(&self, deps: &D, request: &R, mut context: C) -> O {
        for stage in &self.stages {
            match (stage.run)(deps, request, context).await {
                StageOutcome::Continue(next) => context = next,
                StageOutcome::Halt(output) => {
                    tracing::trace!(chain = self.name, stage = stage.name, "chain halted");
                    return output;
                }
            }
        }
        (self.finish)(context)
    }
}
