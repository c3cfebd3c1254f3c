pub mod candle;
pub mod classifier;
pub mod errors;
pub mod indicators;
pub mod ports;
pub mod position;
pub mod regime;
pub mod repositories;
pub mod risk;
pub mod rules;
pub mod sentiment;
pub mod signal;
