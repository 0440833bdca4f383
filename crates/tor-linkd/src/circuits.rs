//! A circuit layer for a relay that doesn't build circuits.

use tor_cell::chancell::msg::DestroyReason;
use tor_cell::chancell::{CircId, RawCellBody};
use tor_link::{
    CircInfo, CircSide, CircuitLayer, ConnHandle, CreateRequest, CreateResponse, Direction,
    Error, Result,
};
use tracing::{debug, info};

/// A [`CircuitLayer`] that refuses every circuit.
///
/// Refusals are queued; the main loop sends a DESTROY for each.
#[derive(Debug, Default)]
pub(crate) struct RefusingCircuitLayer {
    /// Circuits we have been asked to create and haven't answered yet.
    refused: Vec<(ConnHandle, CircId)>,
}

impl RefusingCircuitLayer {
    /// Take the list of circuits that need a DESTROY.
    pub(crate) fn take_refused(&mut self) -> Vec<(ConnHandle, CircId)> {
        std::mem::take(&mut self.refused)
    }
}

impl CircuitLayer for RefusingCircuitLayer {
    fn lookup(&self, _conn: ConnHandle, _id: CircId) -> Option<CircInfo> {
        None
    }
    fn is_hibernating(&self) -> bool {
        false
    }
    fn handle_create(&mut self, conn: ConnHandle, id: CircId, req: CreateRequest) {
        let kind = match req {
            CreateRequest::Tap(_) => "CREATE",
            CreateRequest::Fast(_) => "CREATE_FAST",
        };
        info!("Refusing {} for circuit {} on {}", kind, id, conn);
        if !self.refused.contains(&(conn, id)) {
            self.refused.push((conn, id));
        }
    }
    fn handle_created(&mut self, conn: ConnHandle, id: CircId, _reply: CreateResponse) {
        debug!("Ignoring CREATED for circuit {} on {}", id, conn);
    }
    fn deliver_relay(
        &mut self,
        _conn: ConnHandle,
        _id: CircId,
        _dir: Direction,
        _body: Box<RawCellBody>,
    ) -> Result<()> {
        Err(Error::ChanProto("no circuits here".into()))
    }
    fn handle_destroy(
        &mut self,
        conn: ConnHandle,
        id: CircId,
        _side: CircSide,
        reason: DestroyReason,
    ) {
        debug!("Circuit {} on {} destroyed: {}", id, conn, reason);
    }
    fn mark_for_close(&mut self, conn: ConnHandle, id: CircId, reason: DestroyReason) {
        debug!("Closing circuit {} on {}: {}", id, conn, reason);
    }
    fn connection_closed(&mut self, conn: ConnHandle) {
        self.refused.retain(|(c, _)| *c != conn);
        debug!("Connection {} closed", conn);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tor_link::testing::FakeTransport;
    use tor_link::{LinkConfig, LinkEngine};

    #[test]
    fn refuse() {
        let (mut engine, h) = {
            let trust = tor_link::testing::FakeTrustStore::new(1);
            let mut e: LinkEngine<FakeTransport, _, _> =
                LinkEngine::new(LinkConfig::default(), RefusingCircuitLayer::default(), trust)
                    .unwrap();
            let (t, _peer) = FakeTransport::pair();
            let h = e.accept(t, "192.0.2.9:443".parse().unwrap()).unwrap();
            (e, h)
        };
        let layer = engine.circuits_mut();
        layer.handle_create(h, 5.into(), CreateRequest::Fast(vec![0; 20]));
        layer.handle_create(h, 5.into(), CreateRequest::Fast(vec![0; 20]));
        layer.handle_create(h, 6.into(), CreateRequest::Tap(vec![0; 20]));
        assert_eq!(layer.take_refused(), vec![(h, CircId::from(5)), (h, CircId::from(6))]);
        assert!(layer.take_refused().is_empty());

        layer.handle_create(h, 7.into(), CreateRequest::Fast(vec![0; 20]));
        layer.connection_closed(h);
        assert!(layer.take_refused().is_empty());
        assert!(layer.lookup(h, 7.into()).is_none());
    }
}
