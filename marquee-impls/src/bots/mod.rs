mod ffmpeg_bot;

pub use ffmpeg_bot::*;
