//! Layout recovery.
//!
//! Turns the memory accesses collected by [`crate::analysis`] into nested struct layouts, one
//! tree per pointer parameter.
//!
//! # Key Components
//!
//! - [`Interpolator`] - Groups accesses by base and places members
//! - [`StructLayout`] / [`Member`] / [`MemberKind`] - The recovered types
//! - [`MemberAccess`] - Load/store flags per member
//! - [`LayoutConflict`] - Overlapping accesses and how they were resolved

mod interpolate;
mod types;

pub use interpolate::{Interpolation, Interpolator, LayoutConflict, MAX_STRUCT_SIZE};
pub use types::{Member, MemberAccess, MemberKind, StructLayout, Walk};
