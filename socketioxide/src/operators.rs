//! The chainable room/flag builder returned by `Socket::to`/`Namespace::to`
//! and friends (spec.md §3 "Operators", §5).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use serde::{de::DeserializeOwned, Serialize};

use crate::ack::AckStream;
use crate::adapter::Adapter;
use crate::errors::Error;
use crate::ns::Namespace;
use crate::packet::Packet;
use crate::socket::{SocketId, RESERVED_EVENTS};

pub type Room = String;

/// Types that can be passed to `.to()`/`.in()`/`.except()`: a single room
/// name, a collection of them, or a fixed-size array of string literals.
pub trait RoomParam: 'static {
    type IntoIter: Iterator<Item = Room>;
    fn into_room_iter(self) -> Self::IntoIter;
}

impl RoomParam for Room {
    type IntoIter = std::iter::Once<Room>;
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(self)
    }
}

impl RoomParam for Vec<Room> {
    type IntoIter = std::vec::IntoIter<Room>;
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter()
    }
}

impl RoomParam for &'static str {
    type IntoIter = std::iter::Once<Room>;
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(self.to_string())
    }
}

impl<const COUNT: usize> RoomParam for [&'static str; COUNT] {
    type IntoIter = std::iter::Map<std::array::IntoIter<&'static str, COUNT>, fn(&'static str) -> Room>;

    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(|s| s.to_string())
    }
}

#[derive(Hash, PartialEq, Eq, Clone, Copy, Debug)]
pub enum BroadcastFlags {
    Local,
    Broadcast,
    Timeout(Duration),
    /// Drop rather than queue for any target whose transport isn't
    /// immediately writable (spec.md §4.2 "Broadcast algorithm", §6
    /// "Flags", §8 scenario 6 "Volatile drop").
    Volatile,
}

/// The resolved target set and modifiers an [`Operators`] chain has built
/// up, handed to the [`Adapter`] to perform the actual fan-out.
#[derive(Debug, Default)]
pub struct BroadcastOptions {
    pub flags: HashSet<BroadcastFlags>,
    pub rooms: Vec<Room>,
    pub except: Vec<Room>,
    /// The socket this chain was built from, if any. Used both as the
    /// sole target when no room/broadcast operator was applied, and as
    /// the self-exclusion for a `.broadcast()`.
    pub skip: Option<SocketId>,
}

impl BroadcastOptions {
    pub fn new(skip: Option<SocketId>) -> Self {
        Self {
            skip,
            ..Default::default()
        }
    }
}

/// A chainable selector/modifier over a namespace's sockets, built by
/// `Socket::to`/`Socket::broadcast`/`Namespace::to` and consumed by
/// `.emit()`/`.emit_with_ack()`.
pub struct Operators<A: Adapter> {
    opts: BroadcastOptions,
    ns: Arc<Namespace<A>>,
    binary: Option<Vec<Vec<u8>>>,
}

impl<A: Adapter> Operators<A> {
    pub(crate) fn new(ns: Arc<Namespace<A>>, skip: Option<SocketId>) -> Self {
        Self {
            opts: BroadcastOptions::new(skip),
            ns,
            binary: None,
        }
    }

    /// Selects clients in the given room(s), in addition to any already
    /// selected.
    pub fn to(mut self, rooms: impl RoomParam) -> Self {
        self.opts.rooms.extend(rooms.into_room_iter().unique());
        self.opts.flags.insert(BroadcastFlags::Broadcast);
        self
    }

    /// Alias for [`Operators::to`] matching the JS `in()` spelling.
    pub fn r#in(self, rooms: impl RoomParam) -> Self {
        self.to(rooms)
    }

    /// Excludes clients in the given room(s) from the selection.
    pub fn except(mut self, rooms: impl RoomParam) -> Self {
        self.opts.except.extend(rooms.into_room_iter().unique());
        self.opts.flags.insert(BroadcastFlags::Broadcast);
        self
    }

    /// Restricts the broadcast to this server process only. A no-op for
    /// [`crate::adapter::LocalAdapter`], meaningful once a clustered
    /// adapter is in play.
    pub fn local(mut self) -> Self {
        self.opts.flags.insert(BroadcastFlags::Local);
        self
    }

    /// Selects every client of the namespace (minus the current socket,
    /// if this chain started from one).
    pub fn broadcast(mut self) -> Self {
        self.opts.flags.insert(BroadcastFlags::Broadcast);
        self
    }

    /// Overrides the ack timeout used by [`Operators::emit_with_ack`] for
    /// this emit only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.flags.insert(BroadcastFlags::Timeout(timeout));
        self
    }

    /// Attaches a binary side-channel payload to the emitted event,
    /// producing a BINARY_EVENT packet instead of an EVENT one.
    pub fn bin(mut self, binary: Vec<Vec<u8>>) -> Self {
        self.binary = Some(binary);
        self
    }

    /// Marks this emit as droppable: a target whose transport isn't
    /// immediately writable is skipped instead of queued (spec.md §6
    /// "Flags").
    pub fn volatile(mut self) -> Self {
        self.opts.flags.insert(BroadcastFlags::Volatile);
        self
    }

    /// Sends `event` with `data` to every client this chain selected. A
    /// reserved event name (see [`crate::socket::RESERVED_EVENTS`]) is
    /// silently dropped rather than broadcast.
    pub fn emit(self, event: impl Into<String>, data: impl Serialize) -> Result<(), Error> {
        let event = event.into();
        if RESERVED_EVENTS.contains(&event.as_str()) {
            return Ok(());
        }
        let packet = self.build_packet(event, data)?;
        self.ns.adapter.broadcast(packet, self.opts)
    }

    /// Like [`Operators::emit`], but returns a stream of one ack response
    /// per selected client. Fails synchronously, before any wire traffic,
    /// if this chain selects more than just the anchor socket it was built
    /// from (spec.md §7 item 4 "Misuse").
    pub fn emit_with_ack<V: DeserializeOwned + Send + 'static>(
        self,
        event: impl Into<String>,
        data: impl Serialize,
    ) -> Result<AckStream<V>, Error> {
        if self.is_broadcasting() {
            return Err(Error::CallbackWithBroadcast);
        }
        let packet = self.build_packet(event, data)?;
        Ok(self.ns.adapter.broadcast_with_ack(packet, self.opts))
    }

    /// Whether this chain selects more than the single socket it may have
    /// been anchored on, i.e. a room/`.broadcast()` selector was applied.
    fn is_broadcasting(&self) -> bool {
        !self.opts.rooms.is_empty()
            || !self.opts.except.is_empty()
            || self.opts.flags.contains(&BroadcastFlags::Broadcast)
    }

    /// Returns every socket this chain selected, e.g. to read extension
    /// data off them or to act on them outside the broadcast/emit path
    /// (spec.md §4.2 "clients", expanded per
    /// `other_examples/46c0222a_chrislearn-socketioxide__socketioxide-src-operators.rs.rs`
    /// `Operators::sockets`).
    pub fn sockets(self) -> Vec<Arc<crate::socket::Socket<A>>> {
        self.ns.adapter.fetch_sockets(self.opts)
    }

    /// Forcibly disconnects every socket this chain selected. `close`
    /// behaves as in [`crate::socket::Socket::disconnect`]: when true each
    /// selected socket's whole transport is torn down, not just its
    /// membership in this namespace.
    pub fn disconnect(self, close: bool) -> Result<(), Error> {
        self.ns.adapter.disconnect_socket(self.opts, close)
    }

    /// Makes every socket this chain selected join `rooms`, in addition to
    /// whatever rooms they were already in.
    pub fn join(self, rooms: impl RoomParam) {
        self.ns.adapter.add_sockets(self.opts, rooms.into_room_iter().collect())
    }

    /// Makes every socket this chain selected leave `rooms`.
    pub fn leave(self, rooms: impl RoomParam) {
        self.ns.adapter.del_sockets(self.opts, rooms.into_room_iter().collect())
    }

    fn build_packet(&self, event: impl Into<String>, data: impl Serialize) -> Result<Packet, Error> {
        let data = serde_json::to_value(data)?;
        let packet = match &self.binary {
            Some(bin) => Packet::bin_event(self.ns.path.clone(), event, data, bin.clone()),
            None => Packet::event(self.ns.path.clone(), event, data),
        };
        Ok(packet)
    }
}
