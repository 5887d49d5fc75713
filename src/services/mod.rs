pub mod aggregator;
pub mod analyzer;
pub mod gemini;
pub mod orchestrator;
pub mod parser;
pub mod pool;
pub mod prompt;
pub mod queue;
pub mod rules;
pub mod runs;
