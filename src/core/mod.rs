pub mod attr;
pub mod buffer;
pub mod error;
pub mod locks;
pub mod poll;
pub mod protocol;
pub mod route;

// Environment selection and the three processor variants
pub mod manager;
pub mod processor;
