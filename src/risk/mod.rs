//! Pre-trade risk controls: veto chain and position sizing

mod sizing;
mod veto;

pub use sizing::{PositionSizer, SizeRejection, SizedOrder};
pub use veto::{VetoChain, VetoConfig, VetoResult, VetoStage};
