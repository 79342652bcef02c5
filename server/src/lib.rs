//! # Group Relay Server Library
//!
//! This library implements the server side of the connectionless group
//! messaging relay. Peers exchange short UDP datagrams with the relay,
//! which maintains ephemeral group membership and fans application
//! payloads out to the co-members of the sender's group.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! The relay holds the only copy of group and membership state, entirely
//! in memory and best-effort: nothing survives a process restart. Clients
//! are identified by the `(host, port)` their datagrams arrive from — no
//! handshake, no client-chosen IDs.
//!
//! ### Command Processing
//! Datagrams starting with `!` are protocol commands (`!CREATE`, `!JOIN`,
//! `!LEAVE`, `!PING`, `!WHO`); each one is parsed, validated, applied to
//! the registry and answered with a single reply datagram. All other
//! datagrams are payloads relayed verbatim to group co-members.
//!
//! ### Liveness
//! Clients must show activity within three heartbeat intervals or a
//! periodic sweep evicts them. Groups that sit empty past a TTL are
//! reaped, returning their IDs to the pool.
//!
//! ## Architecture Design
//!
//! The server runs a single event loop that owns the registry and
//! processes two event sources: inbound datagrams (forwarded by a
//! dedicated receiver task over a channel) and sweep-timer ticks. All
//! mutations happen on that loop, which keeps the membership
//! cross-references consistent without per-entity locks.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! The in-memory data model: clients, groups, membership, ownership, the
//! group-ID allocator and the sweep pass.
//!
//! ### Network Module (`network`)
//! The UDP endpoint, datagram classification and dispatch, broadcast
//! fan-out and the run loop with its sweep timer.

pub mod network;
pub mod registry;
