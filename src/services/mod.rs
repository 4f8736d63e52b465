pub mod cache;
pub mod gemini;
pub mod rates;
pub mod remote;
