//! Authoritative in-memory model of clients, groups, membership and ownership
//!
//! The registry is the single source of truth for relay state. It tracks:
//! - Clients, identified by their observed transport address, with a
//!   last-activity timestamp and their joined groups
//! - Groups, identified by a random 8-character ID, with their member set,
//!   owner, size cap and empty-since timestamp
//! - Ownership, a per-address count of live created groups that is kept
//!   apart from client liveness so the creation cap holds even across an
//!   eviction and reconnect of the same address
//!
//! All access is single-writer: the server loop owns the registry and every
//! mutation happens on that loop, so the cross-reference between client
//! memberships and group member sets stays consistent without locks.

use log::{debug, info};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use shared::{ErrorCode, ErrorReply, GROUP_ID_ALPHABET, GROUP_ID_LEN};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Attempts at drawing an unused group ID before giving up. With 34^8
/// possible IDs the retry loop terminates on the first draw in any
/// realistic deployment.
const MAX_ID_ATTEMPTS: usize = 32;

/// Tunable limits and intervals for the relay, filled in from the command
/// line at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Advertised heartbeat cadence; clients idle for longer than three
    /// times this are evicted.
    pub heartbeat: Duration,
    /// Pause between cleanup sweeps.
    pub sweep_interval: Duration,
    /// How long an empty group survives before it is reaped.
    pub empty_ttl: Duration,
    /// Member cap applied to every new group, or None for unlimited.
    pub default_cap: Option<usize>,
    /// How many live groups a single client may own.
    pub max_groups_per_client: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            empty_ttl: Duration::from_secs(300),
            default_cap: Some(128),
            max_groups_per_client: 3,
        }
    }
}

/// Per-client state, created lazily on the first datagram from an address.
#[derive(Debug)]
pub struct ClientEntry {
    /// Last time any datagram arrived from this address.
    pub last_activity: Instant,
    /// Groups this client has joined, in join order (most recent last).
    /// The ordering breaks the tie when `!WHO` or a payload needs a single
    /// group out of several.
    memberships: Vec<String>,
}

impl ClientEntry {
    fn new() -> Self {
        Self {
            last_activity: Instant::now(),
            memberships: Vec::new(),
        }
    }
}

/// A live group.
#[derive(Debug)]
pub struct Group {
    pub id: String,
    /// Address that issued the `!CREATE`. Ownership is released only when
    /// the group itself is removed, not when the owner leaves or is
    /// evicted.
    pub owner: SocketAddr,
    pub members: HashSet<SocketAddr>,
    /// Member cap inherited from the global default at creation.
    pub cap: Option<usize>,
    /// Set whenever `members` is empty, cleared on join. Groups empty for
    /// longer than the TTL are reaped.
    pub empty_since: Option<Instant>,
    pub created_at: Instant,
}

/// What one sweep pass removed, for logging and tests.
#[derive(Debug, Default)]
pub struct SweepStats {
    pub evicted_clients: Vec<SocketAddr>,
    pub removed_groups: Vec<String>,
}

/// Single-writer registry of clients and groups.
pub struct Registry {
    clients: HashMap<SocketAddr, ClientEntry>,
    groups: HashMap<String, Group>,
    /// Live groups per creating address. Deliberately not part of
    /// [`ClientEntry`]: eviction must not reset the creation cap while
    /// the evictee's groups are still live.
    owners: HashMap<SocketAddr, HashSet<String>>,
    config: RelayConfig,
    rng: SmallRng,
}

impl Registry {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            clients: HashMap::new(),
            groups: HashMap::new(),
            owners: HashMap::new(),
            config,
            // Seeded from OS entropy; uniformity matters here, secrecy
            // does not.
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Upserts the client for `addr` and refreshes its activity timestamp.
    /// Every well-framed datagram counts as activity.
    pub fn touch(&mut self, addr: SocketAddr) {
        let entry = self.clients.entry(addr).or_insert_with(|| {
            debug!("New client {}", addr);
            ClientEntry::new()
        });
        entry.last_activity = Instant::now();
    }

    /// Creates a new group owned by `addr` and returns its ID.
    ///
    /// The creator is not auto-joined; the new group starts empty with its
    /// empty-since clock already running.
    pub fn create_group(&mut self, owner: SocketAddr) -> Result<String, ErrorReply> {
        let owned = self.owners.get(&owner).map_or(0, HashSet::len);
        if owned >= self.config.max_groups_per_client {
            return Err(ErrorReply::new(ErrorCode::OwnerLimit, "TooManyGroups"));
        }

        let id = self.allocate_id()?;
        let now = Instant::now();
        self.groups.insert(
            id.clone(),
            Group {
                id: id.clone(),
                owner,
                members: HashSet::new(),
                cap: self.config.default_cap,
                empty_since: Some(now),
                created_at: now,
            },
        );
        self.owners.entry(owner).or_default().insert(id.clone());

        info!("Group {} created by {}", id, owner);
        Ok(id)
    }

    /// Adds `addr` to the group. Joining a group the client is already a
    /// member of succeeds without changing state.
    pub fn join(&mut self, addr: SocketAddr, id: &str) -> Result<(), ErrorReply> {
        let group = self
            .groups
            .get_mut(id)
            .ok_or_else(|| ErrorReply::new(ErrorCode::NoSuchGroup, id))?;

        if group.members.contains(&addr) {
            return Ok(());
        }
        if let Some(cap) = group.cap {
            if group.members.len() >= cap {
                return Err(ErrorReply::new(ErrorCode::GroupFull, id));
            }
        }

        group.members.insert(addr);
        group.empty_since = None;
        self.clients
            .entry(addr)
            .or_insert_with(ClientEntry::new)
            .memberships
            .push(id.to_string());
        Ok(())
    }

    /// Removes `addr` from the group. If that empties the group, the
    /// empty-since clock starts.
    pub fn leave(&mut self, addr: SocketAddr, id: &str) -> Result<(), ErrorReply> {
        let group = match self.groups.get_mut(id) {
            Some(group) if group.members.contains(&addr) => group,
            _ => return Err(ErrorReply::new(ErrorCode::NotInGroup, "NotAMember")),
        };

        group.members.remove(&addr);
        if group.members.is_empty() {
            group.empty_since = Some(Instant::now());
        }
        if let Some(entry) = self.clients.get_mut(&addr) {
            entry.memberships.retain(|gid| gid != id);
        }
        Ok(())
    }

    /// The group a client is currently associated with: its single
    /// membership, or the most recently joined one when it holds several.
    pub fn current_group(&self, addr: SocketAddr) -> Option<&str> {
        self.clients
            .get(&addr)?
            .memberships
            .last()
            .map(String::as_str)
    }

    /// Resolves `!WHO` for a client: current group ID and its member count.
    pub fn who(&self, addr: SocketAddr) -> Result<(String, usize), ErrorReply> {
        let id = self
            .current_group(addr)
            .ok_or_else(|| ErrorReply::new(ErrorCode::NotInGroup, "JoinFirstUseJOIN"))?;
        let count = self.groups[id].members.len();
        Ok((id.to_string(), count))
    }

    /// Member addresses of a live group; used by the broadcast path.
    pub fn members_of(&self, id: &str) -> Option<&HashSet<SocketAddr>> {
        self.groups.get(id).map(|group| &group.members)
    }

    /// Resolves the fan-out for a payload from `sender`: the target group
    /// and every co-member except the sender.
    pub fn broadcast_targets(
        &self,
        sender: SocketAddr,
    ) -> Result<(String, Vec<SocketAddr>), ErrorReply> {
        let id = self
            .current_group(sender)
            .ok_or_else(|| ErrorReply::new(ErrorCode::NotInGroup, "JoinFirstUseJOIN"))?;
        let peers = self.groups[id]
            .members
            .iter()
            .filter(|member| **member != sender)
            .copied()
            .collect();
        Ok((id.to_string(), peers))
    }

    /// Tears down a client entry: drops it from every group it joined,
    /// starting the empty-since clock on any group that empties.
    ///
    /// Ownership records are untouched; groups the client created keep
    /// counting against its cap until they are actually removed.
    pub fn remove_client(&mut self, addr: SocketAddr) {
        let Some(entry) = self.clients.remove(&addr) else {
            return;
        };
        for id in &entry.memberships {
            if let Some(group) = self.groups.get_mut(id) {
                group.members.remove(&addr);
                if group.members.is_empty() {
                    group.empty_since = Some(Instant::now());
                }
            }
        }
        debug!("Client {} removed", addr);
    }

    fn remove_group(&mut self, id: &str) {
        let Some(group) = self.groups.remove(id) else {
            return;
        };
        for member in &group.members {
            if let Some(entry) = self.clients.get_mut(member) {
                entry.memberships.retain(|gid| gid != id);
            }
        }
        if let Some(owned) = self.owners.get_mut(&group.owner) {
            owned.remove(id);
            if owned.is_empty() {
                self.owners.remove(&group.owner);
            }
        }
        info!("Group {} removed", id);
    }

    /// One cleanup pass, snapshotting `now` once.
    ///
    /// Evicts clients idle for longer than three heartbeat intervals, then
    /// reaps groups that have been empty past the TTL and empty groups
    /// whose owner is no longer a known client. Running an extra sweep is
    /// a no-op.
    pub fn sweep(&mut self, now: Instant) -> SweepStats {
        let mut stats = SweepStats::default();
        let inactivity_limit = 3 * self.config.heartbeat;

        let idle: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(_, entry)| {
                now.saturating_duration_since(entry.last_activity) > inactivity_limit
            })
            .map(|(addr, _)| *addr)
            .collect();
        for addr in idle {
            info!("Client {} timed out", addr);
            self.remove_client(addr);
            stats.evicted_clients.push(addr);
        }

        let expired: Vec<String> = self
            .groups
            .values()
            .filter(|group| {
                if !group.members.is_empty() {
                    return false;
                }
                let past_ttl = group.empty_since.map_or(false, |since| {
                    now.saturating_duration_since(since) > self.config.empty_ttl
                });
                past_ttl || !self.clients.contains_key(&group.owner)
            })
            .map(|group| group.id.clone())
            .collect();
        for id in expired {
            self.remove_group(&id);
            stats.removed_groups.push(id);
        }

        stats
    }

    fn allocate_id(&mut self) -> Result<String, ErrorReply> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id: String = (0..GROUP_ID_LEN)
                .map(|_| GROUP_ID_ALPHABET[self.rng.gen_range(0..GROUP_ID_ALPHABET.len())] as char)
                .collect();
            if !self.groups.contains_key(&id) {
                return Ok(id);
            }
        }
        // Astronomically unlikely with a 34^8 namespace.
        Err(ErrorReply::unknown_command())
    }

    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn client(&self, addr: SocketAddr) -> Option<&ClientEntry> {
        self.clients.get(&addr)
    }
}
