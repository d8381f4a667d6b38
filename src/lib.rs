//! postcfg - post-installation configuration for freshly deployed targets.
//!
//! Runs after the installer has unpacked a base system onto a mounted
//! volume: keyring bootstrap, microcode pruning, orphan reconciliation,
//! snapper setup, bootloader regeneration. Every step goes through the
//! [`process::Runner`] seam so the whole pipeline is testable against a
//! scripted runner.

pub mod bootloader;
pub mod config;
pub mod controller;
pub mod keyring;
pub mod microcode;
pub mod orphans;
pub mod probe;
pub mod process;
pub mod snapshots;
