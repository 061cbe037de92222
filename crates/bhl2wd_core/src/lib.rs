pub mod bhl;
pub mod config;
pub mod identifier;
pub mod net;
pub mod pipeline;
pub mod quickstatements;
pub mod server;
pub mod wikidata;
