//! Infrastructure layer for the bus master.
//!
//! Contains the OS-facing adapters: the byte-stream transports that reach the
//! physical bus and the file-system storage for configuration.
//!
//! **Dependency rule**: this layer may depend on `dxl_core`, but MUST NOT
//! import the `application` layer.  The engine depends on the
//! [`transport::Transport`] trait declared here, never on a concrete adapter.

pub mod storage;
pub mod transport;
