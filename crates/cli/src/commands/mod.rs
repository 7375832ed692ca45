pub mod agent;
pub mod lb;
pub mod report;
pub mod topology;
