use anyhow::{Context, Result};
use base64::Engine;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

const MAX_IMAGE_WIDTH: u32 = 1120;
const MAX_IMAGE_HEIGHT: u32 = 1120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// A `data:` URI holding the whole file.
    pub payload: String,
    pub name: String,
}

impl Attachment {
    pub fn image(name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let name = name.into();
        let mut img = image::load_from_memory(bytes)
            .with_context(|| format!("{} is not a readable image", name))?;

        let (width, height) = img.dimensions();
        if width > MAX_IMAGE_WIDTH || height > MAX_IMAGE_HEIGHT {
            let scale = (MAX_IMAGE_WIDTH as f32 / width as f32)
                .min(MAX_IMAGE_HEIGHT as f32 / height as f32);
            let new_width = ((width as f32 * scale) as u32).max(1);
            let new_height = ((height as f32 * scale) as u32).max(1);
            debug!(%name, width, height, new_width, new_height, "downsizing image attachment");
            img = img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3);
        }

        let mut buffer = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
            .context("Failed to encode image")?;

        Ok(Attachment {
            kind: AttachmentKind::Image,
            payload: data_uri("image/png", &buffer),
            name,
        })
    }

    pub fn file(name: impl Into<String>, bytes: &[u8]) -> Self {
        let name = name.into();
        let mime = guess_mime(&name);
        Attachment {
            kind: AttachmentKind::File,
            payload: data_uri(mime, bytes),
            name,
        }
    }

    /// Decoded size of the payload, for display.
    pub fn byte_len(&self) -> usize {
        let encoded = self
            .payload
            .split_once(',')
            .map(|(_, data)| data.len())
            .unwrap_or(0);
        encoded / 4 * 3
    }
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn guess_mime(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Opens the native file picker and loads every selected file. Files that
/// fail to load are skipped with a warning; cancelling yields nothing.
pub async fn pick(kind: AttachmentKind) -> Vec<Attachment> {
    let mut dialog = rfd::AsyncFileDialog::new();
    if kind == AttachmentKind::Image {
        dialog = dialog.add_filter("Images", &["png", "jpg", "jpeg", "gif", "webp", "bmp"]);
    }

    let Some(handles) = dialog.pick_files().await else {
        return Vec::new();
    };

    let mut attachments = Vec::with_capacity(handles.len());
    for handle in handles {
        let name = handle.file_name();
        let bytes = handle.read().await;
        match kind {
            AttachmentKind::Image => match Attachment::image(name.clone(), &bytes) {
                Ok(attachment) => attachments.push(attachment),
                Err(e) => warn!("skipping image attachment {}: {:#}", name, e),
            },
            AttachmentKind::File => attachments.push(Attachment::file(name, &bytes)),
        }
    }
    attachments
}
