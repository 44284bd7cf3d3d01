pub mod analytics;
pub mod attempt;
pub mod grading;
pub mod learner;
pub mod question;
pub mod response;
