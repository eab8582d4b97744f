pub mod answer;
pub mod attempt;
pub mod attempt_event;
pub mod audit_log;
pub mod question;
pub mod quiz;
pub mod result;
