//! # camlink: Camera Link
//!
//! Command-line front end for `camlink-core`. One binary plays either
//! side of a stream:
//!
//! - **Producer** (`camlink serve`): owns the camera, waits for a consumer,
//!   captures at the geometry it asks for and streams raw frames back.
//! - **Consumer** (`camlink connect`): requests a geometry and renders the
//!   frames it receives.
//! - **Local** (`camlink local`): captures and renders in one process.
//!
//! Settings come from a TOML file (`--gen-config` prints the defaults),
//! with command-line flags taking precedence.

pub mod config;
pub mod display;
pub mod service;
