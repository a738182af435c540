//! Request validation helpers
//!
//! Field-level rules live on the request types through `validator` derives;
//! the `Validator` builder covers cross-field checks the derives can't express.

use rust_decimal::Decimal;

use crate::error::{AppError, ValidationBuilder};

/// Validation result type
pub type ValidationResult<T> = Result<T, AppError>;

/// Validator builder for complex validations
pub struct Validator {
    builder: ValidationBuilder,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            builder: ValidationBuilder::new(),
        }
    }

    /// Add error for a field
    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.builder = self.builder.error(field, message);
        self
    }

    /// Add error if condition is true
    pub fn error_if(self, condition: bool, field: &str, message: &str) -> Self {
        if condition {
            self.error(field, message)
        } else {
            self
        }
    }

    /// Validate required string
    pub fn required_string(self, value: Option<&str>, field: &str) -> Self {
        match value {
            Some(s) if !s.trim().is_empty() => self,
            Some(_) => self.error(field, &format!("{} cannot be empty", field)),
            None => self.error(field, &format!("{} is required", field)),
        }
    }

    /// Money amounts are never negative
    pub fn non_negative_amount(self, value: Option<&Decimal>, field: &str) -> Self {
        match value {
            Some(amount) if amount.is_sign_negative() && !amount.is_zero() => {
                self.error(field, &format!("{} cannot be negative", field))
            }
            _ => self,
        }
    }

    /// Validate non-empty collection
    pub fn not_empty<T>(self, value: &[T], field: &str) -> Self {
        if value.is_empty() {
            self.error(field, &format!("{} cannot be empty", field))
        } else {
            self
        }
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        !self.builder.has_errors()
    }

    /// Finish validation, returning error if any
    pub fn finish(self) -> ValidationResult<()> {
        match self.builder.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
