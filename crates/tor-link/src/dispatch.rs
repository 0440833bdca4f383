//! Routing decoded cells to the handshake or the circuit layer.

use tor_cell::chancell::msg::{self, ChanMsg, DestroyReason};
use tor_cell::chancell::{ChanCell, CircId};
use tracing::{debug, trace, warn};

use crate::conn::Connection;
use crate::connmap::ConnHandle;
use crate::handshake::LinkCtx;
use crate::traits::{
    CircSide, CircState, CircuitLayer, CreateRequest, CreateResponse, Direction, Transport,
    TrustStore,
};
use crate::Result;

/// Route one cell that arrived on `conn`.
///
/// Problems with a single circuit close that circuit; only an error
/// returned from here closes the connection.
pub(crate) fn dispatch<T, C, S>(
    h: ConnHandle,
    conn: &mut Connection<T>,
    circuits: &mut C,
    ctx: &LinkCtx<'_, S>,
    cell: ChanCell,
) -> Result<()>
where
    T: Transport,
    C: CircuitLayer,
    S: TrustStore,
{
    let (id, msg) = cell.into_circid_and_msg();
    trace!("{}: Received {} cell on circuit {}", conn.unique_id, msg.cmd(), id);

    match msg {
        ChanMsg::Padding(_) => {
            conn.n_padding += 1;
            return Ok(());
        }
        ChanMsg::Versions(_) | ChanMsg::Netinfo(_) | ChanMsg::Certs(_) | ChanMsg::LinkAuth(_) => {
            return conn.handle_handshake_msg(ctx, msg);
        }
        ChanMsg::Unrecognized(u) => {
            debug!(
                "{}: Dropping cell with unrecognized command {}",
                conn.unique_id,
                u.cmd()
            );
            return Ok(());
        }
        _ => {}
    }

    if !conn.handshake.is_open() {
        warn!(
            "{}: Dropping {} cell that arrived before the link was open",
            conn.unique_id,
            msg.cmd()
        );
        return Ok(());
    }

    match msg {
        ChanMsg::Create(c) => {
            handle_create(h, conn, circuits, ctx, id, CreateRequest::Tap(c.into_body()))
        }
        ChanMsg::CreateFast(c) => {
            handle_create(h, conn, circuits, ctx, id, CreateRequest::Fast(c.into_body()))
        }
        ChanMsg::Created(c) => {
            handle_created(h, conn, circuits, id, CreateResponse::Tap(c.into_body()));
            Ok(())
        }
        ChanMsg::CreatedFast(c) => {
            handle_created(h, conn, circuits, id, CreateResponse::Fast(c.into_body()));
            Ok(())
        }
        ChanMsg::Relay(r) => {
            handle_relay(h, conn, circuits, id, r);
            Ok(())
        }
        ChanMsg::Destroy(d) => {
            match circuits.lookup(h, id) {
                Some(info) => {
                    debug!(
                        "{}: Circuit {} destroyed by peer: {}",
                        conn.unique_id,
                        id,
                        d.reason()
                    );
                    circuits.handle_destroy(h, id, info.side, d.reason());
                }
                None => trace!("{}: DESTROY for unknown circuit {}", conn.unique_id, id),
            }
            Ok(())
        }
        other => {
            debug!("{}: Dropping unexpected {} cell", conn.unique_id, other.cmd());
            Ok(())
        }
    }
}

/// Answer a create-style cell with a DESTROY.
fn refuse_create<T>(conn: &mut Connection<T>, id: CircId, reason: DestroyReason) -> Result<()> {
    conn.queue_cell(ChanCell::new(id, msg::Destroy::new(reason).into()))
}

/// Handle a CREATE or CREATE_FAST.
fn handle_create<T, C, S>(
    h: ConnHandle,
    conn: &mut Connection<T>,
    circuits: &mut C,
    ctx: &LinkCtx<'_, S>,
    id: CircId,
    req: CreateRequest,
) -> Result<()>
where
    C: CircuitLayer,
{
    if circuits.is_hibernating() {
        debug!("{}: Hibernating; refusing circuit {}", conn.unique_id, id);
        return refuse_create(conn, id, DestroyReason::HIBERNATING);
    }
    if !ctx.config.server_mode {
        warn!(
            "{}: Got a create cell on circuit {}, but we're not a server",
            conn.unique_id, id
        );
        return refuse_create(conn, id, DestroyReason::PROTOCOL);
    }
    if conn.circ_id_range.contains(id) {
        warn!(
            "{}: Peer tried to create circuit {} from our half of the ID space",
            conn.unique_id, id
        );
        return refuse_create(conn, id, DestroyReason::PROTOCOL);
    }
    if circuits.lookup(h, id).is_some() {
        debug!(
            "{}: Dropping create cell for existing circuit {}",
            conn.unique_id, id
        );
        return Ok(());
    }
    circuits.handle_create(h, id, req);
    Ok(())
}

/// Handle a CREATED or CREATED_FAST.
fn handle_created<T, C: CircuitLayer>(
    h: ConnHandle,
    conn: &Connection<T>,
    circuits: &mut C,
    id: CircId,
    reply: CreateResponse,
) {
    let info = match circuits.lookup(h, id) {
        Some(info) => info,
        None => {
            debug!("{}: Dropping created cell for unknown circuit {}", conn.unique_id, id);
            return;
        }
    };
    if info.side != CircSide::Next {
        warn!(
            "{}: Got a created cell on circuit {} from the origin side; closing it",
            conn.unique_id, id
        );
        circuits.mark_for_close(h, id, DestroyReason::PROTOCOL);
        return;
    }
    circuits.handle_created(h, id, reply);
}

/// Handle a RELAY.
fn handle_relay<T, C: CircuitLayer>(
    h: ConnHandle,
    conn: &Connection<T>,
    circuits: &mut C,
    id: CircId,
    relay: msg::Relay,
) {
    let info = match circuits.lookup(h, id) {
        Some(info) => info,
        None => {
            debug!("{}: Dropping relay cell for unknown circuit {}", conn.unique_id, id);
            return;
        }
    };
    if info.state == CircState::PendingCreate {
        warn!(
            "{}: Relay cell on circuit {} before it was created; closing it",
            conn.unique_id, id
        );
        circuits.mark_for_close(h, id, DestroyReason::PROTOCOL);
        return;
    }
    let dir = if info.is_origin {
        Direction::TowardOrigin
    } else if info.side == CircSide::Prev {
        Direction::AwayFromOrigin
    } else {
        Direction::TowardOrigin
    };
    let body = Box::new(relay.into_relay_body());
    if let Err(e) = circuits.deliver_relay(h, id, dir, body) {
        warn!(
            "{}: Circuit {} couldn't handle a relay cell ({}); closing it",
            conn.unique_id, id, e
        );
        circuits.mark_for_close(h, id, DestroyReason::PROTOCOL);
    }
}
