pub mod access;
pub mod git;
pub mod repository;
