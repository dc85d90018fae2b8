//! 브로커 커넥터.

pub mod kite;
