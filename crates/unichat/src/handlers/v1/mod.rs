//! V1 API handlers.

mod sessions;

pub use sessions::{
    chat, clear_transcript, create_session, delete_session, get_session, get_transcript,
};
