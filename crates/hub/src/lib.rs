// pactline-hub library
// Realtime connection hub: registry, session lifecycle, broadcast, reaper.

// Core modules
pub mod registry;
pub mod ws;

// Idle eviction
pub mod reaper;

// Composition root
pub mod hub;

// Configuration
pub mod config;

// REST API
pub mod api;
