pub mod client;

pub use client::GitCliClient;
