//! ember-bot - a bot host with a hot-reloading extension runtime
//!
//! Extensions ship as shared-library bundles dropped into a watched
//! directory. The runtime hashes, stages, and loads them without a restart,
//! fans typed events out to their handlers in priority order, and tears all
//! of an extension's registrations down atomically on unload.

pub mod application;
pub mod domain;
pub mod extensions;
pub mod infrastructure;
