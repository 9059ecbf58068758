//! Combination of independent stage branches.

use envd_common::types::StageCompositionStrategy;
use envd_llb::State;

/// Applies independent branches on top of a common parent.
///
/// In merge mode every branch is built from the parent, reduced to its diff
/// against the parent, and all diffs are merged in one op. In sequential mode
/// each branch is built on top of the previous branch's result.
#[derive(Debug)]
pub(crate) struct Composer {
    strategy: StageCompositionStrategy,
    base: State,
    current: State,
    diffs: Vec<State>,
    name: String,
}

impl Composer {
    pub(crate) fn new(strategy: StageCompositionStrategy, base: State, name: impl Into<String>) -> Self {
        Self {
            strategy,
            current: base.clone(),
            base,
            diffs: Vec::new(),
            name: name.into(),
        }
    }

    /// The state the next branch starts from.
    pub(crate) const fn input(&self) -> &State {
        match self.strategy {
            StageCompositionStrategy::Merge => &self.base,
            StageCompositionStrategy::Sequential => &self.current,
        }
    }

    /// Records a branch built from [`Composer::input`].
    pub(crate) fn push(&mut self, branch: State) {
        match self.strategy {
            StageCompositionStrategy::Merge => {
                self.diffs.push(State::diff(&self.base, &branch));
            }
            StageCompositionStrategy::Sequential => self.current = branch,
        }
    }

    pub(crate) fn finish(self) -> State {
        match self.strategy {
            StageCompositionStrategy::Sequential => self.current,
            StageCompositionStrategy::Merge if self.diffs.is_empty() => self.base,
            StageCompositionStrategy::Merge => {
                tracing::debug!(name = %self.name, branches = self.diffs.len(), "merge stage branches");
                let mut layers = Vec::with_capacity(self.diffs.len() + 1);
                layers.push(self.base);
                layers.extend(self.diffs);
                State::merge(&layers)
            }
        }
    }
}
