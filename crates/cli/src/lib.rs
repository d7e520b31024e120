//! `mh-cli`: the `mcphub` operator binary.

pub mod cli;
