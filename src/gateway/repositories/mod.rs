pub mod sessions;
pub mod shared;
pub mod teams;
