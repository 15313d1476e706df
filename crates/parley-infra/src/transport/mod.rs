//! Messaging transport adapters implementing `parley_core::transport::Transport`.

pub mod console;
