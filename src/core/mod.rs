#![forbid(unsafe_code)]

pub mod context;
pub mod discovery;
pub mod git;
pub mod paths;
pub mod resolve;
