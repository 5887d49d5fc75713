pub mod failure;
pub mod job;
pub mod report;
pub mod submission;
pub mod verdict;
