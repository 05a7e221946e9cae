//! facegate-core — Face types, recognition engine contract and identity store.
//!
//! The recognition models themselves are platform supplied and reached
//! through [`RecognitionEngine`]; enrolled identities persist through
//! [`IdentityStore`].

pub mod engine;
pub mod store;
pub mod types;

pub use engine::{EngineError, RecognitionEngine};
pub use store::{IdentityStore, SqliteStore, StoreError};
pub use types::{
    DetectedFace, Embedding, FaceBox, Identity, Image, ImageView, Landmarks, ListKind, MatchResult,
    PixelFormat,
};
