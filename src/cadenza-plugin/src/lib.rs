//! Out-of-process plugins for the Cadenza host.
//!
//! A plugin is an executable speaking newline-delimited JSON over its stdio:
//! - the host writes [`PluginRequest`] messages to the plugin's stdin
//! - the plugin writes [`PluginMessage`] lines to stdout: a `response` that
//!   answers a request by id, or a `callback` carrying catalog updates, search
//!   results and playback notifications at any time
//!
//! # Example Plugin (pseudocode)
//!
//! ```text
//! while (line = read_stdin()):
//!     request = json_parse(line)
//!     if request.method.type == "Initialize":
//!         reply(request.id, {"status": "Initialized", "id": "my-plugin",
//!                            "name": "My Plugin", "version": "1.0.0",
//!                            "protocol_version": 1})
//!     elif request.method.type == "StartSearch":
//!         reply(request.id, {"status": "Ack"})
//!         emit({"kind": "callback", "event": {"type": "SearchResult", "params": ...}})
//! ```
//!
//! [`ExecProvider`] wraps the process and implements
//! [`cadenza_core::MusicProvider`] and [`cadenza_core::DspProvider`].

mod adapter;
mod host;
pub mod protocol;

pub use adapter::{DeathHandler, ExecProvider};
pub use host::{ExecPluginHost, HostEvent, PluginConfig, PluginHostError};
pub use protocol::{
    CallbackEvent, PluginError, PluginErrorKind, PluginInfo, PluginMessage, PluginMethod,
    PluginRequest, PluginResult, PROTOCOL_VERSION,
};
