pub mod aggregator;
pub mod errors;
pub mod models;
pub mod normalize;
pub mod retriever;
pub mod session;
