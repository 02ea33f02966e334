//! Positions, ranges and string helpers shared by the model

pub mod range;
pub mod strings;
