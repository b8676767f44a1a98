pub mod aggregate;
pub mod moderation;
