//! Download, verify and unpack pre-built release binaries.
//!
//! The pipeline runs [`finder`] → [`detect`] → [`fetch`] → [`verify`] →
//! [`extract`], with [`cache`] remembering what was installed per
//! repository. [`install`] drives one run end to end.

pub mod cache;
pub mod cli;
pub mod config;
pub mod detect;
pub mod extract;
pub mod fetch;
pub mod finder;
pub mod install;
pub mod platform;
pub mod target;
pub mod types;
pub mod verify;
