use std::io::Cursor;

use anyhow::{Context, Result};
use arboard::Clipboard;
use image::{DynamicImage, ImageFormat, RgbaImage};

pub mod poller;

pub use poller::{ClipboardPoller, PollerHandle};

/// Normalized clipboard change emitted by the poller. Image payloads are
/// already persisted; only the blob filename crosses the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipEvent {
    Text(String),
    Image { filename: String },
}

/// Boundary to the operating-system clipboard. The production
/// implementation wraps `arboard`; tests script this trait directly.
///
/// Reads return `Ok(None)` when the clipboard holds no content of that
/// type. There is no separate presence probe: with `arboard` a probe would
/// transfer the full payload anyway, so each channel costs at most one
/// transfer per tick.
pub trait SystemClipboard: Send {
    fn read_text(&mut self) -> Result<Option<String>>;
    /// Read the current image as an encoded (PNG) payload.
    fn read_image_encoded(&mut self) -> Result<Option<Vec<u8>>>;
    fn write_text(&mut self, text: &str) -> Result<()>;
    fn write_image_encoded(&mut self, encoded: &[u8]) -> Result<()>;
}

/// `arboard`-backed clipboard. arboard hands image content over as raw
/// RGBA, so reads and writes transcode through PNG at this boundary.
pub struct ArboardClipboard {
    inner: Clipboard,
}

impl ArboardClipboard {
    pub fn new() -> Result<Self> {
        let inner = Clipboard::new().context("opening system clipboard")?;
        Ok(Self { inner })
    }
}

impl SystemClipboard for ArboardClipboard {
    fn read_text(&mut self) -> Result<Option<String>> {
        match self.inner.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(err) => Err(err).context("reading clipboard text"),
        }
    }

    fn read_image_encoded(&mut self) -> Result<Option<Vec<u8>>> {
        let data = match self.inner.get_image() {
            Ok(data) => data,
            Err(arboard::Error::ContentNotAvailable) => return Ok(None),
            Err(err) => return Err(err).context("reading clipboard image"),
        };
        let width = data.width as u32;
        let height = data.height as u32;
        let rgba = RgbaImage::from_raw(width, height, data.bytes.into_owned())
            .context("assembling RGBA image from clipboard data")?;
        let mut encoded = Vec::new();
        DynamicImage::ImageRgba8(rgba)
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .context("encoding clipboard image as PNG")?;
        Ok(Some(encoded))
    }

    fn write_text(&mut self, text: &str) -> Result<()> {
        self.inner.set_text(text).context("writing clipboard text")
    }

    fn write_image_encoded(&mut self, encoded: &[u8]) -> Result<()> {
        let decoded = image::load_from_memory(encoded)
            .context("decoding PNG payload for clipboard write")?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        let image_data = arboard::ImageData {
            width: width as usize,
            height: height as usize,
            bytes: decoded.into_raw().into(),
        };
        self.inner
            .set_image(image_data)
            .context("writing clipboard image")
    }
}
