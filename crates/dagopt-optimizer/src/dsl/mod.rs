//! Textual front ends for describing a `LogicalDag`.

pub mod yaml;
