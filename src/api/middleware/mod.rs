//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Requester capture: client IP and User-Agent for audit entries
//! 2. Auth validator: bearer token → `Caller`

pub mod audit;
pub mod auth;
