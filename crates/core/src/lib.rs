pub mod camera;
pub mod error;
pub mod estimator;
pub mod ffmpeg;
pub mod frame;
pub mod job;
pub mod parser;
pub mod render;
pub mod types;
pub mod worker;
