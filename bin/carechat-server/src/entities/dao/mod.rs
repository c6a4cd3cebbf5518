pub mod chat;

pub use chat::StoredMessageRecord;
