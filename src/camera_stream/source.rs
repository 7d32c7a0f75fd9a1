//! Frame sources
//!
//! Network streams, capture devices and video files are decoded by one
//! `ffmpeg` child process per connection, emitting raw `rgb24` frames at
//! the requested size on stdout. Static images are decoded in-process and
//! re-read on every iteration.

use crate::error::{Error, Result};
use crate::frame;
use crate::models::{Frame, FrameSize};
use futures::future::BoxFuture;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

/// A live frame read that takes longer than this is treated as a failure
const READ_TIMEOUT: Duration = Duration::from_secs(10);

const NETWORK_SCHEMES: [&str; 5] = ["rtsp://", "rtsps://", "rtmp://", "http://", "https://"];
const IMAGE_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".bmp"];

/// Kind of camera source, derived from its locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Network stream (RTSP/RTMP/HTTP)
    Network,
    /// Still image re-read every iteration
    StaticImage,
    /// Local capture device index
    Device(i32),
    /// Video file, looped on end of stream
    File,
}

/// Classify a source locator
pub fn classify(locator: &str) -> SourceKind {
    let trimmed = locator.trim();
    let lower = trimmed.to_ascii_lowercase();

    if NETWORK_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return SourceKind::Network;
    }
    if IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return SourceKind::StaticImage;
    }
    if let Ok(index) = trimmed.parse::<i32>() {
        return SourceKind::Device(index);
    }
    SourceKind::File
}

/// An open frame source
pub trait FrameSource: Send {
    /// Next frame; `Ok(None)` at end of stream
    fn read_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>>>;

    /// Restart from the first frame
    fn rewind(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Opens frame sources; a successful open has already produced a frame
pub trait SourceOpener: Send + Sync {
    fn open<'a>(
        &'a self,
        kind: SourceKind,
        locator: &'a str,
        size: FrameSize,
    ) -> BoxFuture<'a, Result<Box<dyn FrameSource>>>;
}

/// Default opener: ffmpeg for streams, in-process decoding for images
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegOpener;

impl SourceOpener for FfmpegOpener {
    fn open<'a>(
        &'a self,
        kind: SourceKind,
        locator: &'a str,
        size: FrameSize,
    ) -> BoxFuture<'a, Result<Box<dyn FrameSource>>> {
        Box::pin(async move {
            let source: Box<dyn FrameSource> = match kind {
                SourceKind::StaticImage => Box::new(StaticImageSource::open(locator, size).await?),
                _ => Box::new(FfmpegSource::spawn(kind, locator, size).await?),
            };
            Ok(source)
        })
    }
}

/// ffmpeg command line for a source
pub fn ffmpeg_args(kind: SourceKind, locator: &str, size: FrameSize) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    match kind {
        SourceKind::Network => {
            let lower = locator.to_ascii_lowercase();
            if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
                args.extend(["-rtsp_transport", "tcp"].map(String::from));
            }
            args.extend(
                [
                    "-fflags",
                    "nobuffer",
                    "-flags",
                    "low_delay",
                    "-probesize",
                    "32",
                    "-analyzeduration",
                    "0",
                ]
                .map(String::from),
            );
            args.extend(["-i".to_string(), locator.to_string()]);
        }
        SourceKind::Device(index) => {
            args.extend(["-f", "v4l2"].map(String::from));
            args.extend([
                "-video_size".to_string(),
                format!("{}x{}", size.width, size.height),
                "-i".to_string(),
                format!("/dev/video{}", index),
            ]);
        }
        SourceKind::File | SourceKind::StaticImage => {
            args.extend(["-i".to_string(), locator.to_string()]);
        }
    }

    args.extend([
        "-an".to_string(),
        "-vf".to_string(),
        format!("scale={}:{}", size.width, size.height),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-".to_string(),
    ]);
    args
}

/// ffmpeg-backed source
pub struct FfmpegSource {
    kind: SourceKind,
    locator: String,
    size: FrameSize,
    _child: Child,
    stdout: ChildStdout,
    /// Frame consumed by the test read at spawn
    pending: Option<Frame>,
}

impl FfmpegSource {
    /// Spawn ffmpeg and perform a test read
    pub async fn spawn(kind: SourceKind, locator: &str, size: FrameSize) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .args(ffmpeg_args(kind, locator, size))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Source(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Source("ffmpeg stdout not captured".to_string()))?;

        let mut source = Self {
            kind,
            locator: locator.to_string(),
            size,
            _child: child,
            stdout,
            pending: None,
        };

        match source.read_raw().await? {
            Some(first) => {
                source.pending = Some(first);
                Ok(source)
            }
            None => Err(Error::Source(format!("no frames from {}", locator))),
        }
    }

    async fn read_raw(&mut self) -> Result<Option<Frame>> {
        let mut buf = vec![0u8; self.size.rgb_len()];

        let read = match tokio::time::timeout(READ_TIMEOUT, self.stdout.read_exact(&mut buf)).await {
            Ok(read) => read,
            Err(_) => {
                return Err(Error::Source(format!(
                    "frame read timed out after {}s",
                    READ_TIMEOUT.as_secs()
                )))
            }
        };

        match read {
            Ok(_) => Frame::from_raw(self.size.width, self.size.height, buf)
                .map(Some)
                .ok_or_else(|| Error::Source("frame buffer size mismatch".to_string())),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl FrameSource for FfmpegSource {
    fn read_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>>> {
        Box::pin(async move {
            if let Some(frame) = self.pending.take() {
                return Ok(Some(frame));
            }
            self.read_raw().await
        })
    }

    fn rewind(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            // Replacing self drops the old child (killed on drop)
            *self = Self::spawn(self.kind, &self.locator, self.size).await?;
            Ok(())
        })
    }
}

/// Still image decoded from disk on every read
pub struct StaticImageSource {
    path: PathBuf,
    size: FrameSize,
}

impl StaticImageSource {
    /// Verify the image decodes
    pub async fn open(path: impl Into<PathBuf>, size: FrameSize) -> Result<Self> {
        let source = Self {
            path: path.into(),
            size,
        };
        source.load().await?;
        Ok(source)
    }

    async fn load(&self) -> Result<Frame> {
        let path = self.path.clone();
        let size = self.size;
        tokio::task::spawn_blocking(move || -> Result<Frame> {
            let decoded = image::open(&path)?.to_rgb8();
            Ok(frame::resize_to(decoded, size))
        })
        .await
        .map_err(|e| Error::Internal(format!("image decode task failed: {}", e)))?
    }
}

impl FrameSource for StaticImageSource {
    fn read_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>>> {
        Box::pin(async move { self.load().await.map(Some) })
    }

    fn rewind(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("rtsp://10.0.0.5:554/stream"), SourceKind::Network);
        assert_eq!(classify("RTSPS://cam/stream"), SourceKind::Network);
        assert_eq!(classify("rtmp://host/live"), SourceKind::Network);
        assert_eq!(classify("https://cam/mjpeg"), SourceKind::Network);
        assert_eq!(classify("/data/lab.JPG"), SourceKind::StaticImage);
        assert_eq!(classify("shot.bmp"), SourceKind::StaticImage);
        assert_eq!(classify(" 0 "), SourceKind::Device(0));
        assert_eq!(classify("2"), SourceKind::Device(2));
        assert_eq!(classify("/data/lab.mp4"), SourceKind::File);
    }

    #[test]
    fn test_ffmpeg_args_network() {
        let args = ffmpeg_args(SourceKind::Network, "rtsp://cam/s", FrameSize::new(640, 480));
        let joined = args.join(" ");
        assert!(joined.contains("-rtsp_transport tcp"));
        assert!(joined.contains("-fflags nobuffer -flags low_delay"));
        assert!(joined.contains("-i rtsp://cam/s"));
        assert!(joined.ends_with("-vf scale=640:480 -pix_fmt rgb24 -f rawvideo -"));

        let http = ffmpeg_args(SourceKind::Network, "http://cam/mjpeg", FrameSize::new(640, 480));
        assert!(!http.iter().any(|a| a == "-rtsp_transport"));
    }

    #[test]
    fn test_ffmpeg_args_device() {
        let args = ffmpeg_args(SourceKind::Device(1), "1", FrameSize::new(320, 240));
        let joined = args.join(" ");
        assert!(joined.contains("-f v4l2 -video_size 320x240 -i /dev/video1"));
    }

    #[test]
    fn test_ffmpeg_args_file() {
        let args = ffmpeg_args(SourceKind::File, "/data/lab.mp4", FrameSize::new(320, 240));
        let joined = args.join(" ");
        assert!(joined.contains("-nostdin -i /data/lab.mp4 -an"));
        assert!(!args.iter().any(|a| a == "-loop"));
    }

    #[tokio::test]
    async fn test_static_image_source() {
        let path = std::env::temp_dir().join(format!("ppe_edge_static_{}.png", std::process::id()));
        Frame::from_pixel(20, 10, image::Rgb([200, 10, 10])).save(&path).unwrap();

        let mut source = StaticImageSource::open(&path, FrameSize::new(40, 20)).await.unwrap();
        let frame = source.read_frame().await.unwrap().unwrap();
        assert_eq!((frame.width(), frame.height()), (40, 20));

        std::fs::remove_file(&path).unwrap();
        assert!(source.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_static_image_missing() {
        let result = StaticImageSource::open("/nonexistent/ppe_edge.png", FrameSize::new(8, 8)).await;
        assert!(result.is_err());
    }
}
