//! Decision-service implementations.

pub mod gemini;

pub use gemini::GeminiDecisionService;
