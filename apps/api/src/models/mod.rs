pub mod audit;
pub mod job;
pub mod prompt;
pub mod resume;
