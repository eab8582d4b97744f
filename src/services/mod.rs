pub mod attempt_service;
pub mod event_service;
pub mod grading_service;
pub mod result_service;
