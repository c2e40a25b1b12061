//! HTTP route modules.

pub mod secrets;
pub mod sys;
