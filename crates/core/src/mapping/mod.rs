//! Transformation of legacy user rows into identity-service payloads.
//!
//! Both pieces are pure and configured once at construction:
//! 1. [`RoleResolver`]: legacy level → role name, with a fixed fallback
//! 2. [`FieldMapper`]: source row → create-account payload

pub mod fields;
pub mod roles;

pub use fields::FieldMapper;
pub use roles::RoleResolver;
