pub mod attempt_repository;
pub mod question_bank;
pub mod roster;
pub mod test_repository;

pub use attempt_repository::{AttemptRepository, AttemptStanding, PgAttemptRepository, StartOutcome};
pub use question_bank::{PgQuestionBank, QuestionBank};
pub use roster::{PgRosterResolver, RosterResolver};
pub use test_repository::{PgTestRepository, TestFilter, TestRepository};
