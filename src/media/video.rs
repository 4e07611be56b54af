use super::{OutputFormat, TransformError, TransformSpec};
use async_process::Command;
use std::path::PathBuf;
use tracing::{debug, info};

/// Thin wrapper over the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl Ffmpeg {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Checks that ffmpeg runs, for the startup health check.
    pub async fn version(&self) -> Result<String, TransformError> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .output()
            .await
            .map_err(|e| TransformError::Ffmpeg(e.to_string()))?;

        if !output.status.success() {
            return Err(TransformError::Ffmpeg(format!("exit status {}", output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Re-encodes `raw` to H.264/AAC MP4 bounded by the class dimensions.
    pub async fn transcode(&self, raw: &[u8], spec: &TransformSpec) -> Result<Vec<u8>, TransformError> {
        if spec.format != OutputFormat::Mp4 {
            return Err(TransformError::Encode {
                format: spec.format,
                message: "not a video format".to_string(),
            });
        }

        let workdir = tempfile::tempdir().map_err(|e| TransformError::Ffmpeg(e.to_string()))?;
        let input = workdir.path().join("source");
        let output = workdir.path().join(format!("out.{}", spec.extension));

        tokio::fs::write(&input, raw)
            .await
            .map_err(|e| TransformError::Ffmpeg(e.to_string()))?;

        let args = transcode_args(&input, &output, spec);
        debug!("🎬 ffmpeg {}", args.join(" "));

        let result = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| TransformError::Ffmpeg(e.to_string()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(3).collect();
            return Err(TransformError::Ffmpeg(format!(
                "exit status {}: {}",
                result.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        let bytes = tokio::fs::read(&output)
            .await
            .map_err(|e| TransformError::Ffmpeg(e.to_string()))?;

        info!("🎬 Video recodificado: {} -> {} bytes", raw.len(), bytes.len());
        Ok(bytes)
    }
}

/// Argumentos de ffmpeg: escala dentro de la caja conservando aspecto, dimensiones pares para x264.
fn transcode_args(input: &std::path::Path, output: &std::path::Path, spec: &TransformSpec) -> Vec<String> {
    let scale = format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,scale=trunc(iw/2)*2:trunc(ih/2)*2",
        w = spec.width,
        h = spec.height
    );

    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-vf".to_string(),
        scale,
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "medium".to_string(),
        "-crf".to_string(),
        format!("{}", spec.quality.round().clamp(0.0, 51.0) as u32),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.display().to_string(),
    ]
}
