//! Interactive CLI chat experience for kbchat.
//!
//! Implements the multi-session chat loop: live streamed replies, slash
//! commands for switching between conversations, and background turns that
//! keep streaming while another conversation is focused. Entry point:
//! `loop_runner::run_chat_loop`.

pub mod banner;
pub mod commands;
pub mod input;
pub mod loop_runner;
pub mod renderer;
