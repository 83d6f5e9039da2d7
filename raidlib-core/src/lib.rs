// vim: tw=80
//! Geometry and request lifecycle core of a software RAID library
//!
//! The [`geometry`] module translates host LBAs into physical drive positions
//! for every supported layout.  The [`request`] module tracks in-flight
//! requests and their per-stripe pieces, and [`group`] quiesces, drains and
//! restarts them on behalf of a raid group.  [`raw_mirror`] is a self-contained
//! mirror used for bootstrap metadata.

// I don't find this lint very helpful
#![allow(clippy::type_complexity)]

// RAID5, RAID10, IOTS and SIOTS read better in capitals.
#![allow(clippy::upper_case_acronyms)]

// rstest_reuse must be imported at the crate root for macro reasons
// https://github.com/la10736/rstest/issues/128
#[cfg(test)]
#[allow(clippy::single_component_path_imports)]
use rstest_reuse;

pub mod config;
pub mod geometry;
pub mod group;
pub mod raw_mirror;
pub mod request;
pub mod types;

pub use crate::types::*;
