use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::preprocess::NormalizedImage;
use super::recognition::{OcrEngine, OcrError};

/// Runs the `tesseract` command-line engine, feeding the image on stdin and
/// reading the recognized text from stdout.
pub struct TesseractCli {
    binary: String,
    lang: String,
}

impl TesseractCli {
    pub fn new(binary: &str, lang: &str) -> Self {
        Self {
            binary: binary.to_string(),
            lang: lang.to_string(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["stdin", "stdout", "-l", &self.lang])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn extract_text(&self, image: &NormalizedImage) -> Result<String, OcrError> {
        let png = image.to_png()?;
        let mut child = self.command().spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&png).await?;
            // Dropping stdin closes the pipe so tesseract starts reading.
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(OcrError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::preprocess::preprocess_bytes;

    fn blank() -> NormalizedImage {
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(image::GrayImage::new(8, 8))
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        preprocess_bytes(&buf.into_inner()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let engine = TesseractCli::new("/nonexistent/bin/tesseract", "eng");
        let err = engine.extract_text(&blank()).await.unwrap_err();
        assert!(matches!(err, OcrError::Spawn(_)));
    }

    #[test]
    fn test_command_arguments() {
        let engine = TesseractCli::new("tesseract", "eng+fra");
        let cmd = engine.command();
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["stdin", "stdout", "-l", "eng+fra"]);
    }
}
