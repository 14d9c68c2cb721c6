//! Upstream retrieval clients.

pub mod tss_udp;
