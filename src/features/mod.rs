pub mod antibot;
pub mod block_detector;
pub mod progress;
