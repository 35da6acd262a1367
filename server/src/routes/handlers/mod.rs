#[cfg(debug_assertions)]
pub mod dev_only;
pub mod email;
pub mod embeddings;
pub mod threads;
pub mod workflow;
