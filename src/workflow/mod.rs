pub mod assignment_ctx;
pub mod assignment_flow;

pub use assignment_ctx::AssignmentCtx;
pub use assignment_flow::{AssignmentFlow, PreparedAssignment};
