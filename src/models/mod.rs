pub mod approval;
pub mod audit;
pub mod rule;
pub mod user;
