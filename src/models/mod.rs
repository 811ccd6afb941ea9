pub mod assignment;
pub mod cell;
pub mod expected;
pub mod loaders;
pub mod record;

pub use assignment::{Assignment, StudentName};
pub use cell::{CellRange, CellRef, CellValue};
pub use expected::{Criterion, ExpectedResults, PredicateOp, Rule};
pub use loaders::load_expected_results;
pub use record::{CriterionOutcome, ResultRecord, Score, Status};
