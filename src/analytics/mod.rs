//! Request logging.
//!
//! Every backend call is appended to `~/.pneumo/request-log.jsonl` as one
//! JSON line. See [`logger`].

pub mod logger;
