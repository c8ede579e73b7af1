//! Source identities, feed health and capture capabilities

pub mod capability;
pub mod feeds;
pub mod slot;

pub use capability::{
    AudioSource, AudioSourceFactory, PlayerEvent, ProbeOutcome, RemoteFeedProbe, VideoSource,
    VideoSourceFactory,
};
pub use feeds::{FeedBoard, FeedHealth, HealthWriter};
pub use slot::{AudioSelection, EffectiveAudioSource, FeedIndex, Medium, SourceSlot};
