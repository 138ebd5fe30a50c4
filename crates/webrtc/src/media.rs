//! Media contracts at the engine boundary
//!
//! Device capture belongs to the embedder; the engine orchestrates
//! handles through these traits and never touches devices itself.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        })
    }
}

/// Which capture device a video track uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    /// User-facing camera
    Front,
    /// Environment-facing camera
    Back,
}

impl CameraFacing {
    /// The other camera
    pub fn flipped(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }
}

/// What to capture locally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Capture an audio track
    pub audio: bool,
    /// Capture a video track
    pub video: bool,
    /// Initial camera
    pub facing: CameraFacing,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            facing: CameraFacing::Front,
        }
    }
}

/// Locally captured media attached to a call
#[async_trait]
pub trait LocalMedia: Send + Sync {
    /// Stable stream identifier
    fn id(&self) -> &str;

    /// Whether the `kind` track is currently enabled
    fn is_enabled(&self, kind: MediaKind) -> bool;

    /// Enable or disable the `kind` track; returns the new state
    fn set_enabled(&self, kind: MediaKind, enabled: bool) -> bool;

    /// Flip the enabled state of the `kind` track; returns the new state
    fn toggle(&self, kind: MediaKind) -> bool {
        let next = !self.is_enabled(kind);
        self.set_enabled(kind, next)
    }

    /// Switch between front and back capture devices
    async fn switch_camera(&self) -> Result<()>;

    /// Stop capture and release the devices
    fn stop(&self);

    /// Backend downcast seam
    fn as_any(&self) -> &dyn Any;
}

/// Media arriving from the remote participant
pub trait RemoteMedia: Send + Sync {
    /// Remote stream identifier
    fn id(&self) -> &str;

    /// Backend downcast seam
    fn as_any(&self) -> &dyn Any;
}

/// Capture device acquisition
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire local media satisfying `constraints`
    async fn capture(&self, constraints: &MediaConstraints) -> Result<Arc<dyn LocalMedia>>;
}

/// Receives the local media handle, or `None` when it is released
pub type LocalMediaSink = Arc<dyn Fn(Option<Arc<dyn LocalMedia>>) + Send + Sync>;

/// Receives the remote media handle, or `None` when the remote side goes
/// away
pub type RemoteMediaSink = Arc<dyn Fn(Option<Arc<dyn RemoteMedia>>) + Send + Sync>;
