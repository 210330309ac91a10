pub mod access;
pub mod entities;
pub mod layout;
pub mod ssh_url;
pub mod value_objects;
