pub mod static_tokens;

pub use static_tokens::StaticTokenAccess;
