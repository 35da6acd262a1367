pub mod ollama;
pub mod task_extraction;
