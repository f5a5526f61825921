//! Keeps a rendered scene in step with a camera-based tracking backend.
//!
//! A [`session::ArSession`] owns the video device, runs the tracking backend
//! on a worker thread, and folds its per-frame results into a
//! [`store::SceneStore`]: anchors pinned to image targets or face landmarks,
//! a deformable face surface, camera parameters, and a light rig driven by
//! sampled frame brightness.

pub mod anchor;
pub mod config;
pub mod error;
pub mod face_mesh;
pub mod light;
pub mod pipeline;
pub mod pose;
pub mod projection;
pub mod session;
pub mod store;
pub mod tracker;
pub mod types;

pub use anchor::{AnchorId, AnchorPhase, EdgeCallbacks};
pub use config::{LightConfig, SessionCallbacks, SessionConfig, TrackerOptions};
pub use error::{Result, TrackingError};
pub use face_mesh::{FaceSurface, FaceTopology};
pub use session::ArSession;
pub use store::{AnchorView, SceneStore};
pub use tracker::{Backend, FaceEngine, ImageTargetEngine, InputSize, TargetUpdate};
pub use types::{CameraParams, FaceEstimate, FacingMode, Frame, LightEstimate, TargetDescriptor};
