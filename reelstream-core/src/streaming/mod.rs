//! Range delivery of media bytes from disk or from a live swarm session.
//!
//! A [`ContentSourceSelector`] decides where the bytes of a download key come
//! from and hands back a [`ContentProvider`]. The [`DeliveryAdapter`] then
//! resolves the request range against the provider's declared size and either
//! streams the bytes unchanged or pipes them through a [`Transcoder`].

pub mod delivery;
pub mod disk;
pub mod provider;
pub mod range;
pub mod selector;
pub mod swarm_file;
pub mod transcode;

pub use delivery::{Delivery, DeliveryAdapter, DeliveryError, DeliveryStatus, Framing};
pub use disk::DiskFileProvider;
pub use provider::{ContentProvider, ProviderError, SourceKind};
pub use range::{ByteRange, RangeNotSatisfiable};
pub use selector::{ContentSourceSelector, SelectError};
pub use swarm_file::SwarmFileProvider;
pub use transcode::{ByteStream, FfmpegTranscoder, OutputFormat, TranscodeError, Transcoder};
