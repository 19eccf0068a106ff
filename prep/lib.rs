#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod cache;
pub mod cohort;
pub mod config;
pub mod dedup;
pub mod encode;
pub mod evaluate;
pub mod normalize;
pub mod pipeline;
pub mod sequence;
pub mod table;
pub mod target;
pub mod tensor;
