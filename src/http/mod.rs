//! The application protocol carried by the transports: a small subset of HTTP/1.x, with one
//!  request and one response per session. Messages are text heads (`\r\n` separated, terminated
//!  by a blank line) followed by an optional body whose length is given by `Content-Length`.

pub mod client;
pub mod handler;
pub mod message;
pub mod url;

#[cfg(test)]
mod end_to_end;
