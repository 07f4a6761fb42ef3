pub mod frames;
pub mod jobs;
pub mod pose;
