use std::{io::ErrorKind, process::Stdio, time::Duration};

use async_trait::async_trait;
use log::{debug, info, warn};
use marquee_core::{BotBackend, BotError, BotRequest, BotStream, Frame};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, ChildStdout, Command},
};
use url::form_urlencoded::byte_serialize;

#[derive(Debug, Clone)]
pub struct FfmpegBotConfig {
    pub ffmpeg_path: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
    /// Where the encoded stream is pushed to. `{room}` and `{token}` are substituted.
    pub publish_url: String,
}

impl Default for FfmpegBotConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            width: 1280,
            height: 720,
            frame_rate: 30.,
            publish_url: "rtmp://localhost:1935/live/{room}?access_token={token}".to_string(),
        }
    }
}

impl FfmpegBotConfig {
    /// The size of one raw rgb24 frame, in bytes.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn publish_url_for(&self, room_name: &str, token: &str) -> String {
        let encode = |s: &str| byte_serialize(s.as_bytes()).collect::<String>();

        self.publish_url
            .replace("{room}", &encode(room_name))
            .replace("{token}", &encode(token))
    }

    /// Arguments of the process decoding the source into raw frames on stdout.
    fn decoder_args(&self, source_url: &str) -> Vec<String> {
        let filter = format!(
            "scale={}:{},fps={}",
            self.width, self.height, self.frame_rate
        );

        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            source_url,
            "-an",
            "-vf",
            filter.as_str(),
            "-pix_fmt",
            "rgb24",
            "-f",
            "rawvideo",
            "pipe:1",
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }

    /// Arguments of the process encoding raw frames from stdin and pushing them to the room.
    fn encoder_args(&self, publish_url: &str) -> Vec<String> {
        let size = format!("{}x{}", self.width, self.height);
        let rate = self.frame_rate.to_string();

        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            size.as_str(),
            "-r",
            rate.as_str(),
            "-i",
            "pipe:0",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-tune",
            "zerolatency",
            "-pix_fmt",
            "yuv420p",
            "-f",
            "flv",
            publish_url,
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }
}

/// A [BotBackend] that decodes and re-encodes the movie with ffmpeg child processes.
pub struct FfmpegBot {
    config: FfmpegBotConfig,
}

/// A decoder and an encoder process, with the bot pacing frames from one into the other.
pub struct FfmpegStream {
    config: FfmpegBotConfig,
    decoder: Child,
    encoder: Child,
    frames: ChildStdout,
    sink: ChildStdin,
    frames_read: u64,
}

impl FfmpegBot {
    pub fn new(config: FfmpegBotConfig) -> Self {
        Self { config }
    }

    fn spawn(&self, args: Vec<String>, stdin: Stdio, stdout: Stdio) -> Result<Child, BotError> {
        Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(BotError::from)
    }
}

#[async_trait]
impl BotBackend for FfmpegBot {
    async fn prepare(&self, request: BotRequest) -> Result<Box<dyn BotStream>, BotError> {
        let publish_url = self
            .config
            .publish_url_for(&request.room_name, &request.token);

        let mut decoder = self
            .spawn(
                self.config.decoder_args(&request.source_url),
                Stdio::null(),
                Stdio::piped(),
            )
            .map_err(|e| BotError::Source(e.to_string()))?;

        let mut encoder = self
            .spawn(
                self.config.encoder_args(&publish_url),
                Stdio::piped(),
                Stdio::null(),
            )
            .map_err(|e| BotError::Connect(e.to_string()))?;

        let frames = decoder
            .stdout
            .take()
            .ok_or_else(|| BotError::Source("decoder has no stdout".to_string()))?;
        let sink = encoder
            .stdin
            .take()
            .ok_or_else(|| BotError::Connect("encoder has no stdin".to_string()))?;

        info!(
            "Bot {} connecting to {} with {}",
            request.identity, request.room_name, request.source_url
        );

        Ok(Box::new(FfmpegStream {
            config: self.config.clone(),
            decoder,
            encoder,
            frames,
            sink,
            frames_read: 0,
        }))
    }
}

#[async_trait]
impl BotStream for FfmpegStream {
    fn frame_rate(&self) -> Option<f32> {
        Some(self.config.frame_rate)
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, BotError> {
        let mut data = vec![0; self.config.frame_size()];

        match self.frames.read_exact(&mut data).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(BotError::Source(err.to_string())),
        }

        let position =
            Duration::from_secs_f64(self.frames_read as f64 / self.config.frame_rate as f64);
        self.frames_read += 1;

        Ok(Some(Frame { data, position }))
    }

    async fn publish(&mut self, frame: Frame) -> Result<(), BotError> {
        self.sink
            .write_all(&frame.data)
            .await
            .map_err(|e| BotError::Publish(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), BotError> {
        let FfmpegStream {
            mut decoder,
            mut encoder,
            mut sink,
            frames_read,
            ..
        } = *self;

        // Closing stdin lets the encoder flush and disconnect
        if let Err(err) = sink.shutdown().await {
            debug!("Encoder stdin was already closed: {}", err);
        }
        drop(sink);

        if let Err(err) = decoder.start_kill() {
            debug!("Decoder already exited: {}", err);
        }
        decoder.wait().await?;

        let status = encoder.wait().await?;
        if !status.success() {
            warn!("Encoder exited with {}", status);
        }

        info!("Bot disconnected after {} frames", frames_read);
        Ok(())
    }
}
