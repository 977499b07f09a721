// Source analysis
mod parser;
mod index;
mod scanner;
mod loader;
mod call_graph;
mod models;

// Context assembly and schema lookup
mod context;
mod schema;

// Generation and output
mod llm;
mod layout;
mod runner;
mod report;

mod engine;

// Export the main engine
pub use engine::Engine;
