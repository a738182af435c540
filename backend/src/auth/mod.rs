//! Request identity
//!
//! Session handling sits in front of this service; requests arrive with the
//! acting employee already resolved into the `X-Employee-Id` header.

pub mod middleware;

pub use middleware::{CurrentEmployee, EMPLOYEE_HEADER};
