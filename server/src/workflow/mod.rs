pub mod grouping;
pub mod service;
