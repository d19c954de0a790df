//! Core types for roomkeeper.
//!
//! Everything in this crate is independent of how rooms are stored or how
//! chat events arrive: the [`provider::VoiceProvider`] and
//! [`surface::ControlSurface`] traits are the seams to the outside world, and
//! [`tracker::EmptyTimers`] and [`workflow::DeletionWorkflow`] are pure state
//! machines driven by the lifecycle crate.

pub mod error;
pub mod provider;
pub mod record;
pub mod surface;
pub mod tracker;
pub mod workflow;

pub use error::{ProviderError, SurfaceError};
pub use record::{
    MessageId, MessageRef, ResourceId, ResourceRecord, RoomSpec, RoomState, SurfaceId, UserId,
};
