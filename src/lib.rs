//! Software audio mixing engine and gapless/crossfading playback coordinator,
//! extracted from a home-theater media player's audio subsystem into a standalone
//! crate: `engine` mixes PCM streams and one-shot sounds down to a sink, `player`
//! sequences decoders across track boundaries on top of it.

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod packetizer;
pub mod player;
pub mod postproc;
pub mod remap;
pub mod sink;
pub mod sound;
pub mod stream;
pub mod viz;

pub use engine::Engine;
pub use error::{PlayerError, PlayerResult, SoftAeError, SoftAeResult};
pub use player::Player;
