//! Wire formats exchanged with the remote control APIs.

pub mod instance_url;
