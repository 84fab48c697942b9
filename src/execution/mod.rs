// Position management and order execution module
pub mod controller;
pub mod entry;
pub mod plan;
pub mod reconciler;

pub use controller::{RunOutcome, TradingController};
pub use entry::{EntryPlanner, EntryProposal};
pub use plan::{ExitReason, Plan, PlanPhase};
pub use reconciler::{ExitFill, PositionReconciler, ReconcileOutcome};
