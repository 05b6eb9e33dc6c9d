// src/groupchat/mod.rs

pub mod agent;
pub mod classifier;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod controller;
pub mod history;
pub mod participant;
pub mod tool_protocol;
pub mod tool_protocols;

// Let's explicitly export the session types so callers don't have to reach
// through groupchat::controller::GroupChatSession and can use
// groupchat::GroupChatSession instead.
pub use controller::{GroupChatSession, GroupChatSessionBuilder};
pub use history::ChatHistory;
