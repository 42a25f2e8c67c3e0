use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use image::{ImageFormat, ImageReader};
use log::debug;
use tokio::process::Command;
use uuid::Uuid;

/// Screenshots smaller than this are almost always blank or failed grabs.
const MIN_SCREENSHOT_BYTES: usize = 1000;

/// Full-screen image source. Only invoked after the matcher approved capture.
#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    async fn capture(&self) -> Result<Vec<u8>>;
}

/// Grabs the primary display as PNG through the platform screenshot tool.
#[derive(Debug, Clone)]
pub struct SystemScreenCapturer {
    timeout: Duration,
    scratch_dir: PathBuf,
}

impl SystemScreenCapturer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            scratch_dir: std::env::temp_dir(),
        }
    }

    fn command_for(&self, target: &str) -> Result<Command> {
        if cfg!(target_os = "macos") {
            let mut command = Command::new("screencapture");
            command.args(["-x", "-t", "png", target]);
            Ok(command)
        } else if cfg!(target_os = "linux") {
            let mut command = Command::new("import");
            command.args(["-window", "root", &format!("png:{target}")]);
            Ok(command)
        } else {
            bail!("screen capture is not supported on this platform")
        }
    }
}

#[async_trait]
impl ScreenCapturer for SystemScreenCapturer {
    async fn capture(&self) -> Result<Vec<u8>> {
        let path = self
            .scratch_dir
            .join(format!("flowtrace-{}.png", Uuid::new_v4()));
        let target = path
            .to_str()
            .ok_or_else(|| anyhow!("scratch path is not valid UTF-8"))?
            .to_string();

        let mut command = self.command_for(&target)?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let status = tokio::time::timeout(self.timeout, command.status())
            .await
            .map_err(|_| anyhow!("screen capture timed out after {:?}", self.timeout))?
            .context("failed to spawn screen capture tool")?;
        if !status.success() {
            let _ = tokio::fs::remove_file(&path).await;
            bail!("screen capture tool exited with {status}");
        }

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read screenshot {}", path.display()));
        if let Err(err) = tokio::fs::remove_file(&path).await {
            debug!("failed to remove scratch screenshot {}: {err}", path.display());
        }
        let bytes = bytes?;

        if bytes.len() < MIN_SCREENSHOT_BYTES {
            bail!("screenshot too small ({} bytes), likely blank", bytes.len());
        }

        let (bytes, (width, height)) = tokio::task::spawn_blocking(move || {
            let dimensions = png_dimensions(&bytes)?;
            Ok::<_, anyhow::Error>((bytes, dimensions))
        })
        .await
        .context("screenshot decode worker join failed")??;
        debug!("captured {width}x{height} screenshot ({} bytes)", bytes.len());

        Ok(bytes)
    }
}

/// Decode the PNG header and return its dimensions.
pub fn png_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let reader = ImageReader::with_format(Cursor::new(bytes), ImageFormat::Png);
    reader
        .into_dimensions()
        .context("screenshot is not a readable PNG")
}
