mod handler;

pub use handler::{establish, release, ws_handler, Session};
