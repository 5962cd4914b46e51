//! Room membership and broadcast fan-out, behind a trait so the in-memory
//! implementation shipped here can later be swapped for one that
//! coordinates across multiple server processes (spec.md §3 "Adapter",
//! Non-goals: no clustered implementation ships in this crate).
//!
//! Every operation here is synchronous: rooms live behind a plain
//! `RwLock`, mirroring the non-blocking, channel-backed sends
//! `engineioxide::socket::Socket` already exposes. A clustered adapter
//! that genuinely needs network I/O can still spawn its own tasks from
//! these methods; it just can't `.await` inline.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use futures::{stream, StreamExt};
use itertools::Itertools;
use serde::de::DeserializeOwned;

use crate::ack::AckStream;
use crate::errors::Error;
use crate::ns::Namespace;
use crate::operators::{BroadcastFlags, BroadcastOptions, Room};
use crate::packet::Packet;
use crate::socket::{Socket, SocketId};

/// Membership and broadcast operations a [`crate::ns::Namespace`] delegates
/// to. [`LocalAdapter`] is the only implementation this crate ships; the
/// generic parameter exists so a clustered adapter can be dropped in
/// without touching `Client`/`Namespace`/`Socket`.
pub trait Adapter: Send + Sync + 'static {
    fn new(ns: Weak<Namespace<Self>>) -> Self
    where
        Self: Sized;

    /// Runs once the namespace that owns this adapter is fully constructed.
    fn init(&self) {}
    /// Runs when the owning namespace is torn down.
    fn close(&self) {}

    /// How many server processes participate in this adapter's view of the
    /// world. Always `1` for [`LocalAdapter`].
    fn server_count(&self) -> u16;

    fn add_all(&self, sid: SocketId, rooms: Vec<Room>);
    fn del(&self, sid: SocketId, rooms: Vec<Room>);
    fn del_all(&self, sid: SocketId);

    /// `packet` carries its own binary attachments inline (see
    /// [`crate::packet::BinaryPacket`]); there's no separate payload to pass.
    fn broadcast(&self, packet: Packet, opts: BroadcastOptions) -> Result<(), Error>;

    fn broadcast_with_ack<V: DeserializeOwned + Send + 'static>(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
    ) -> AckStream<V>;

    fn sockets(&self, rooms: Vec<Room>) -> Vec<SocketId>;
    fn socket_rooms(&self, sid: SocketId) -> Vec<Room>;

    fn fetch_sockets(&self, opts: BroadcastOptions) -> Vec<Arc<Socket<Self>>>
    where
        Self: Sized;
    fn add_sockets(&self, opts: BroadcastOptions, rooms: Vec<Room>);
    fn del_sockets(&self, opts: BroadcastOptions, rooms: Vec<Room>);
    fn disconnect_socket(&self, opts: BroadcastOptions, close: bool) -> Result<(), Error>;
}

/// The single-process adapter: rooms are just a `HashMap<Room,
/// HashSet<SocketId>>` guarded by an `RwLock`, and broadcast means "send to
/// every matching socket on this process" (spec.md §3, no-persistence
/// Non-goal).
pub struct LocalAdapter {
    rooms: RwLock<HashMap<Room, HashSet<SocketId>>>,
    ns: Weak<Namespace<LocalAdapter>>,
}

impl Adapter for LocalAdapter {
    fn new(ns: Weak<Namespace<Self>>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            ns,
        }
    }

    fn server_count(&self) -> u16 {
        1
    }

    fn add_all(&self, sid: SocketId, rooms: Vec<Room>) {
        let mut rooms_map = self.rooms.write().unwrap();
        for room in rooms {
            rooms_map.entry(room).or_insert_with(HashSet::new).insert(sid);
        }
    }

    fn del(&self, sid: SocketId, rooms: Vec<Room>) {
        let mut rooms_map = self.rooms.write().unwrap();
        for room in rooms {
            if let Some(sockets) = rooms_map.get_mut(&room) {
                sockets.remove(&sid);
            }
        }
    }

    fn del_all(&self, sid: SocketId) {
        let mut rooms_map = self.rooms.write().unwrap();
        for sockets in rooms_map.values_mut() {
            sockets.remove(&sid);
        }
    }

    fn broadcast(&self, packet: Packet, opts: BroadcastOptions) -> Result<(), Error> {
        let volatile = opts.flags.contains(&BroadcastFlags::Volatile);
        let sockets = self.apply_opts(opts);
        tracing::debug!(count = sockets.len(), "broadcasting packet");
        for socket in sockets {
            if volatile && !socket.writable() {
                tracing::debug!(sid = %socket.id, "dropping volatile packet, socket not writable");
                continue;
            }
            socket.send(packet.clone())?;
        }
        Ok(())
    }

    fn broadcast_with_ack<V: DeserializeOwned + Send + 'static>(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
    ) -> AckStream<V> {
        let duration: Option<Duration> = opts.flags.iter().find_map(|flag| match flag {
            BroadcastFlags::Timeout(d) => Some(*d),
            _ => None,
        });
        let sockets = self.apply_opts(opts);
        let count = sockets.len().max(1);
        let futs = sockets.into_iter().map(move |socket| {
            let packet = packet.clone();
            async move { socket.send_with_ack(packet, duration).await }
        });
        stream::iter(futs).buffer_unordered(count).boxed()
    }

    fn sockets(&self, rooms: Vec<Room>) -> Vec<SocketId> {
        let opts = BroadcastOptions {
            rooms,
            ..Default::default()
        };
        self.apply_opts(opts).into_iter().map(|s| s.id).collect()
    }

    fn socket_rooms(&self, sid: SocketId) -> Vec<Room> {
        let rooms_map = self.rooms.read().unwrap();
        rooms_map
            .iter()
            .filter(|(_, sockets)| sockets.contains(&sid))
            .map(|(room, _)| room.clone())
            .collect()
    }

    fn fetch_sockets(&self, opts: BroadcastOptions) -> Vec<Arc<Socket<Self>>> {
        self.apply_opts(opts)
    }

    fn add_sockets(&self, opts: BroadcastOptions, rooms: Vec<Room>) {
        for socket in self.apply_opts(opts) {
            self.add_all(socket.id, rooms.clone());
        }
    }

    fn del_sockets(&self, opts: BroadcastOptions, rooms: Vec<Room>) {
        for socket in self.apply_opts(opts) {
            self.del(socket.id, rooms.clone());
        }
    }

    fn disconnect_socket(&self, opts: BroadcastOptions, close: bool) -> Result<(), Error> {
        for socket in self.apply_opts(opts) {
            socket.disconnect(close)?;
        }
        Ok(())
    }
}

impl LocalAdapter {
    fn apply_opts(&self, opts: BroadcastOptions) -> Vec<Arc<Socket<Self>>> {
        let ns = self.ns.upgrade().expect("namespace dropped before its adapter");
        let except = self.except_sids(&opts.except);

        if !opts.rooms.is_empty() {
            let rooms_map = self.rooms.read().unwrap();
            rooms_map
                .iter()
                .filter(|(room, _)| opts.rooms.contains(room))
                .flat_map(|(_, sockets)| sockets)
                .filter(|sid| !except.contains(*sid) && Some(**sid) != opts.skip)
                .unique()
                .filter_map(|sid| ns.get_socket(*sid))
                .collect()
        } else if opts.flags.contains(&BroadcastFlags::Broadcast) {
            ns.sockets()
                .into_iter()
                .filter(|s| !except.contains(&s.id) && Some(s.id) != opts.skip)
                .collect()
        } else if let Some(sid) = opts.skip {
            ns.get_socket(sid).into_iter().collect()
        } else {
            vec![]
        }
    }

    fn except_sids(&self, except: &[Room]) -> HashSet<SocketId> {
        let rooms_map = self.rooms.read().unwrap();
        let mut out = HashSet::new();
        for room in except {
            if let Some(sockets) = rooms_map.get(room) {
                out.extend(sockets.iter().copied());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engineioxide::socket::Socket as EIoSocket;
    use engineioxide::Sid;
    use serde_json::{json, Value};

    use crate::client::SocketData;
    use crate::config::SocketIoConfig;
    use crate::ns::Namespace;
    use crate::socket::Socket;

    use std::sync::Arc;

    fn connected_socket(
        ns: &Arc<Namespace<LocalAdapter>>,
    ) -> (Arc<Socket<LocalAdapter>>, Arc<EIoSocket<SocketData>>) {
        let esocket: Arc<EIoSocket<SocketData>> =
            Arc::new(EIoSocket::new_dummy(Sid::new(), Box::new(|_, _| {})));
        let sid = esocket.id;
        ns.connect(sid, esocket.clone(), "null".to_string(), Arc::new(SocketIoConfig::default()))
            .unwrap();
        (ns.get_socket(sid).unwrap(), esocket)
    }

    #[tokio::test]
    async fn volatile_emit_skips_a_socket_whose_transport_is_not_writable() {
        let ns = Namespace::<LocalAdapter>::new(
            "/".to_string(),
            |_: Arc<Socket<LocalAdapter>>, _: Value| async {},
        );
        let (socket, esocket) = connected_socket(&ns);
        assert!(socket.writable());

        // Closing the underlying transport makes it unwritable; a volatile
        // broadcast should silently skip it rather than surface the write
        // failure a non-volatile emit would hit.
        esocket.close(engineioxide::socket::DisconnectReason::TransportClose);
        assert!(!socket.writable());

        assert!(ns
            .adapter
            .broadcast(
                Packet::event("/", "tick", json!(null)),
                BroadcastOptions {
                    flags: std::iter::once(BroadcastFlags::Volatile).collect(),
                    skip: Some(socket.id),
                    ..Default::default()
                },
            )
            .is_ok());
    }
}
