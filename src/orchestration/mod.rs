//! Composite requests
//!
//! A [`ChainRequest`] runs its members one after another, each step able to
//! use the previous result. A [`BatchRequest`] runs its members together and
//! completes once, when all succeed or at the first failure.

pub mod batch;
pub mod chain;

pub use batch::{BatchCallback, BatchRequest};
pub use chain::{ChainCallback, ChainRequest};

/// Progress of a chain or batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeState {
    Idle,
    Running,
    Finished,
    Failed,
    Stopped,
}

impl CompositeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CompositeState::Finished | CompositeState::Failed | CompositeState::Stopped
        )
    }
}
