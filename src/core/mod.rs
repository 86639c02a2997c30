pub mod bots;
pub mod chat;
pub mod credentials;

pub use bots::{load_all_bots, Bots};
pub use chat::{ChatAdapter, StreamMode, TextStream};
pub use credentials::Credentials;
