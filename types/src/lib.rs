/*
 * Copyright 2024 Oxide Computer Company
 */

pub mod input;
pub mod job;

pub use input::*;
pub use job::*;
