// Diagnostics: hand-off counters for the frame exchange.

pub mod stats;
