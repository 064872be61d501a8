#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Mammographic mass severity analysis: loading, imputation, exploration and
//! cost-complexity pruned classification trees.

pub mod config;
pub mod data;
pub mod explore;
pub mod fixtures;
pub mod metrics;
pub mod model;
pub mod pipeline;
mod progress;
pub mod report;
pub mod split;
pub mod tune;

#[path = "../tree/mod.rs"]
pub mod tree;

#[path = "../impute/mod.rs"]
pub mod impute;
