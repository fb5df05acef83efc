//! Fan-out from the slot-id signal to registered destinations.
//!
//! The router is single-threaded: it takes slot ids in worker emission
//! order, reads just the tag byte to resolve the destination list, bumps
//! the refcount by the extra fan-out and hands every destination a
//! read-only view. The router releases each reference as the destination
//! returns, including on delivery failure, so `k` destinations always
//! means `k` releases.
//!
//! Destinations are held weakly; a window that went away is pruned from
//! the table on the next message for its tag.

use crate::ControlMsg;
use crate::destination::{Destination, MessageView};
use cogbus_events::{MessageTag, RoutingErrorKind};
use cogbus_pool::{MessagePool, PoolId};
use cogterm_util::now_ns;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub routed: u64,
    pub no_destination: u64,
    pub delivery_errors: u64,
    /// Messages signalled by the worker but not yet fully delivered.
    pub in_flight: u64,
}

pub struct Router {
    pool: Arc<MessagePool>,
    table: RwLock<HashMap<u8, Vec<Weak<dyn Destination>>>>,
    control: Sender<ControlMsg>,
    in_flight: Arc<AtomicU64>,
    routed: AtomicU64,
    no_destination: AtomicU64,
    delivery_errors: AtomicU64,
}

impl Router {
    pub fn new(
        pool: Arc<MessagePool>,
        control: Sender<ControlMsg>,
        in_flight: Arc<AtomicU64>,
    ) -> Self {
        Self {
            pool,
            table: RwLock::new(HashMap::new()),
            control,
            in_flight,
            routed: AtomicU64::new(0),
            no_destination: AtomicU64::new(0),
            delivery_errors: AtomicU64::new(0),
        }
    }

    /// Adds a destination for one tag. The router keeps only a weak
    /// reference; the caller owns the destination's lifetime.
    pub fn register(&self, tag: MessageTag, dest: &Arc<dyn Destination>) {
        self.table
            .write()
            .expect("destination table poisoned")
            .entry(tag.wire())
            .or_default()
            .push(Arc::downgrade(dest));
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            routed: self.routed.load(Ordering::Relaxed),
            no_destination: self.no_destination.load(Ordering::Relaxed),
            delivery_errors: self.delivery_errors.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
        }
    }

    /// Main loop. Ends when the worker drops its end of the signal after
    /// the final drain.
    pub fn run(&self, signal: Receiver<PoolId>) {
        for id in signal.iter() {
            self.dispatch(id);
        }
        debug!("router signal disconnected, loop ending");
    }

    /// Routes one published slot and drops the in-flight count when every
    /// reference the router is responsible for has been released.
    pub fn dispatch(&self, id: PoolId) {
        let Some(tag) = self.pool.message_type(id) else {
            warn!(slot = id.0, "unknown tag byte in slot header, dropping");
            self.pool.release(id);
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return;
        };

        // Specialized pipeline events fire regardless of whether any
        // window subscribed: the debugger reply must always go out.
        if tag.is_debugger()
            && let Some(core) = tag.cog_index()
        {
            let slot = self.pool.get(id);
            let _ = self.control.send(ControlMsg::DebuggerPacket {
                core,
                payload: slot.payload().to_vec(),
            });
        } else if tag == MessageTag::P2SystemInit {
            let _ = self.control.send(ControlMsg::SystemReboot);
        }

        let destinations = self.resolve(tag);
        let k = destinations.len() as u32;
        if k == 0 {
            self.no_destination.fetch_add(1, Ordering::Relaxed);
            self.pool.release(id);
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        if k > 1 {
            // One reference was transferred in the hand-off; add the rest.
            self.pool.increment(id, k - 1);
        }

        let slot = self.pool.get(id);
        let view = MessageView {
            tag,
            flags: slot.flags(),
            payload: slot.payload(),
            timestamp_ns: now_ns(),
            pool_id: id,
        };
        for dest in &destinations {
            if let Err(e) = dest.deliver(&view) {
                self.delivery_errors.fetch_add(1, Ordering::Relaxed);
                let _ = self.control.send(ControlMsg::RoutingError {
                    kind: RoutingErrorKind::DestinationFailed,
                    detail: format!("{}: {e}", dest.name()),
                });
            }
            // The router owns releasing, also after a failed delivery.
            self.pool.release(id);
        }

        self.routed.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Upgrades the destination list for `tag`, pruning entries whose
    /// windows have gone away.
    fn resolve(&self, tag: MessageTag) -> Vec<Arc<dyn Destination>> {
        let table = self.table.read().expect("destination table poisoned");
        let Some(entries) = table.get(&tag.wire()) else {
            return Vec::new();
        };
        let live: Vec<Arc<dyn Destination>> =
            entries.iter().filter_map(Weak::upgrade).collect();
        let dead = entries.len() - live.len();
        drop(table);

        if dead > 0 {
            debug!(tag = ?tag, dead, "pruning dropped destinations");
            let mut table = self.table.write().expect("destination table poisoned");
            if let Some(entries) = table.get_mut(&tag.wire()) {
                entries.retain(|w| w.strong_count() > 0);
            }
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{DeliveryError, OwnedMessage, TerminalSink};
    use cogbus_pool::{MessagePool, PoolConfig};
    use crossbeam_channel::unbounded;

    fn test_pool() -> Arc<MessagePool> {
        Arc::new(
            MessagePool::new(PoolConfig {
                small_slots: 8,
                small_size: 64,
                large_slots: 2,
                large_size: 1024,
            })
            .unwrap(),
        )
    }

    fn publish(pool: &MessagePool, tag: MessageTag, payload: &[u8]) -> PoolId {
        let mut w = pool.acquire(payload.len()).expect("slot");
        w.write_tag(tag);
        w.write_flags(0);
        w.write_payload(payload);
        w.id()
    }

    fn router_with(pool: Arc<MessagePool>) -> (Router, Receiver<ControlMsg>, Arc<AtomicU64>) {
        let (ctl_tx, ctl_rx) = unbounded();
        let in_flight = Arc::new(AtomicU64::new(0));
        (Router::new(pool, ctl_tx, Arc::clone(&in_flight)), ctl_rx, in_flight)
    }

    #[test]
    fn fan_out_delivers_k_times_and_refcount_returns_to_zero() {
        let pool = test_pool();
        let (router, _ctl, in_flight) = router_with(Arc::clone(&pool));

        let (tx_a, rx_a) = unbounded::<OwnedMessage>();
        let (tx_b, rx_b) = unbounded::<OwnedMessage>();
        let a: Arc<dyn Destination> = Arc::new(TerminalSink::new(tx_a));
        let b: Arc<dyn Destination> = Arc::new(TerminalSink::new(tx_b));
        router.register(MessageTag::TerminalOutput, &a);
        router.register(MessageTag::TerminalOutput, &b);

        let id = publish(&pool, MessageTag::TerminalOutput, b"Hello\n");
        in_flight.fetch_add(1, Ordering::AcqRel);
        router.dispatch(id);

        assert_eq!(rx_a.try_recv().unwrap().payload, b"Hello\n");
        assert_eq!(rx_b.try_recv().unwrap().payload, b"Hello\n");
        assert_eq!(pool.refcount(id), 0);
        assert_eq!(in_flight.load(Ordering::Acquire), 0);
        assert_eq!(router.stats().routed, 1);
    }

    #[test]
    fn no_destination_releases_and_counts() {
        let pool = test_pool();
        let (router, _ctl, in_flight) = router_with(Arc::clone(&pool));
        let id = publish(&pool, MessageTag::BacktickMidi, b"`MIDI on\n");
        in_flight.fetch_add(1, Ordering::AcqRel);
        router.dispatch(id);
        assert_eq!(pool.refcount(id), 0);
        assert_eq!(router.stats().no_destination, 1);
    }

    #[test]
    fn dropped_destination_is_pruned_and_message_released() {
        let pool = test_pool();
        let (router, _ctl, in_flight) = router_with(Arc::clone(&pool));

        let (tx, _rx) = unbounded::<OwnedMessage>();
        let dest: Arc<dyn Destination> = Arc::new(TerminalSink::new(tx));
        router.register(MessageTag::TerminalOutput, &dest);
        drop(dest);

        let id = publish(&pool, MessageTag::TerminalOutput, b"orphan\n");
        in_flight.fetch_add(1, Ordering::AcqRel);
        router.dispatch(id);
        assert_eq!(pool.refcount(id), 0);
        assert_eq!(router.stats().no_destination, 1);
    }

    #[test]
    fn debugger_tag_emits_control_packet_even_without_destinations() {
        let pool = test_pool();
        let (router, ctl, in_flight) = router_with(Arc::clone(&pool));
        let payload = vec![0x5Au8; 416];
        let id = publish(&pool, MessageTag::debugger(3), &payload);
        in_flight.fetch_add(1, Ordering::AcqRel);
        router.dispatch(id);

        match ctl.try_recv().unwrap() {
            ControlMsg::DebuggerPacket { core, payload: p } => {
                assert_eq!(core, 3);
                assert_eq!(p, payload);
            }
            other => panic!("unexpected control message: {other:?}"),
        }
        assert_eq!(pool.refcount(id), 0);
    }

    #[test]
    fn failing_destination_still_gets_released() {
        struct Failing;
        impl Destination for Failing {
            fn deliver(&self, _msg: &MessageView<'_>) -> Result<(), DeliveryError> {
                Err(DeliveryError("window bust".into()))
            }
            fn name(&self) -> &str {
                "failing"
            }
        }

        let pool = test_pool();
        let (router, ctl, in_flight) = router_with(Arc::clone(&pool));
        let dest: Arc<dyn Destination> = Arc::new(Failing);
        router.register(MessageTag::TerminalOutput, &dest);

        let id = publish(&pool, MessageTag::TerminalOutput, b"x\n");
        in_flight.fetch_add(1, Ordering::AcqRel);
        router.dispatch(id);

        assert_eq!(pool.refcount(id), 0);
        assert_eq!(router.stats().delivery_errors, 1);
        assert!(matches!(
            ctl.try_recv().unwrap(),
            ControlMsg::RoutingError {
                kind: RoutingErrorKind::DestinationFailed,
                ..
            }
        ));
    }
}
