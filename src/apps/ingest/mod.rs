//! Image ingest application.
//!
//! Each packet is a [`BlockPacket`] whose metadata block is JSON
//! ([`ImageMetadata`]) and whose trailing block is the encoded image. The
//! image is written to `<images_dir>/<hardware>_<timestamp>.<ext>`.
//!
//! Bad packets are logged and skipped; the connection stays open.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::IngestConfig;
use crate::core::packet::BlockPacket;
use crate::error::{ProtocolError, Result};
use crate::server::{Callback, Connection};

pub mod metadata;

pub use metadata::{parse_metadata, ImageMetadata};

#[derive(Debug, Clone)]
pub struct IngestCallback {
    images_dir: PathBuf,
    extension: String,
}

impl IngestCallback {
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
            extension: String::from("png"),
        }
    }

    /// Build from configuration; the images directory is required.
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        let dir = config.images_dir.as_ref().ok_or_else(|| {
            ProtocolError::ConfigError(
                "Images directory not set (use --images-dir or IMAGES_REPOSITORY)".to_string(),
            )
        })?;
        Ok(Self::new(dir).with_extension(&config.extension))
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Destination file for an image described by `meta`.
    ///
    /// Fails when either name component could leave the images directory.
    pub fn image_path(&self, meta: &ImageMetadata) -> Result<PathBuf> {
        let hardware = checked_component(&meta.originator_hardware_address_string)?;
        let timestamp = checked_component(&meta.originator_time_stamp_utc_string)?;
        Ok(self
            .images_dir
            .join(format!("{hardware}_{timestamp}.{}", self.extension)))
    }

    async fn store(&self, packet: &BlockPacket) -> Result<Option<PathBuf>> {
        let meta = parse_metadata(packet.metadata())?;
        let Some(image) = packet.trailing() else {
            warn!(
                hardware = %meta.originator_hardware_address_string,
                "Packet carries no image block, skipping"
            );
            return Ok(None);
        };

        let path = self.image_path(&meta)?;
        tokio::fs::write(&path, image).await?;
        info!(path = %path.display(), bytes = image.len(), "Stored image");
        Ok(Some(path))
    }
}

fn checked_component(part: &str) -> Result<&str> {
    if part.is_empty() || part == "." || part.contains(['/', '\\']) || part.contains("..") {
        return Err(ProtocolError::Metadata(format!(
            "Unsafe file name component: {part:?}"
        )));
    }
    Ok(part)
}

impl Callback<BlockPacket> for IngestCallback {
    async fn on_connect(&self, conn: &Arc<Connection>) -> bool {
        let peer = conn.peer_addr();
        info!(conn_id = conn.id(), %peer, "Sensor connected");
        conn.put_extra_data(peer).is_ok()
    }

    async fn on_message(&self, conn: &Arc<Connection>, packet: BlockPacket) -> bool {
        match self.store(&packet).await {
            Ok(_) => {}
            Err(e @ ProtocolError::Io(_)) => {
                error!(conn_id = conn.id(), error = %e, "Failed to write image");
            }
            Err(e) => {
                warn!(conn_id = conn.id(), error = %e, "Rejected image packet");
            }
        }
        true
    }

    async fn on_close(&self, conn: &Arc<Connection>) {
        info!(
            conn_id = conn.id(),
            peer = ?conn.extra_data::<SocketAddr>(),
            "Sensor disconnected"
        );
    }
}
