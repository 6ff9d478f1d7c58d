//! One control-protocol connection's serve loop: send `WELCOME`, authorize,
//! then alternate reading a request and writing its reply until the peer
//! disconnects or the connection enters `SEND_MODE`.
//! [`Message::read_from`]/[`Message::write_to`] work over any
//! `std::io::{Read, Write}`, so framing is read into a buffer with Tokio's
//! async I/O first and then parsed/encoded synchronously — the usual bridge
//! for a synchronous codec sitting behind an async socket.

use crate::auth;
use crate::dispatch;
use crate::flags::SharedFlags;
use crate::lock_registry::ConnectionLocks;
use crate::send_mode;
use shepherd_core::{Config, Error, Result};
use shepherd_storage::bucket::BucketStore;
use shepherd_storage::index::UrlIndex;
use shepherd_storage::state_dir::files;
use shepherd_storage::urldb::UrlDb;
use shepherd_wire::{Header, Message, Mode, Payload, Reply, Request};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

async fn read_message(stream: &mut TcpStream) -> Result<Message> {
    let mut header_buf = [0u8; shepherd_wire::HEADER_SIZE];
    stream.read_exact(&mut header_buf).await?;
    let header = Header::read_from(&mut &header_buf[..])?;
    let mut framed = Vec::with_capacity(shepherd_wire::HEADER_SIZE + header.data_len as usize);
    framed.extend_from_slice(&header_buf);
    let mut payload = vec![0u8; header.data_len as usize];
    stream.read_exact(&mut payload).await?;
    framed.extend_from_slice(&payload);
    Message::read_from(&mut &framed[..])
}

async fn write_message(stream: &mut TcpStream, msg: &Message) -> Result<()> {
    let mut buf = Vec::new();
    msg.write_to(&mut buf)?;
    stream.write_all(&buf).await?;
    Ok(())
}

/// Serve one accepted connection to completion. Errors are logged and
/// end the connection; they never propagate to the listener, since one
/// misbehaving peer shouldn't take down the accept loop.
pub async fn serve(mut stream: TcpStream, peer: IpAddr, cfg: Config, flags: SharedFlags, state_dir: PathBuf) {
    if let Err(e) = serve_inner(&mut stream, peer, &cfg, &flags, &state_dir).await {
        warn!(error = %e, %peer, "connection ended with an error");
    }
}

async fn serve_inner(
    stream: &mut TcpStream,
    peer: IpAddr,
    cfg: &Config,
    flags: &SharedFlags,
    state_dir: &Path,
) -> Result<()> {
    if !auth::is_authorized(&cfg.authorized_ips, peer) {
        write_message(stream, &Message::empty(Mode::Control, Reply::NotAuthorized as u8, 0)).await?;
        return Ok(());
    }
    write_message(stream, &Message::welcome(0)).await?;
    info!(%peer, "connection authorized");

    let mut locks = ConnectionLocks::new(state_dir.join("lock"));
    let mut in_send_mode = false;

    loop {
        let msg = match read_message(stream).await {
            Ok(msg) => msg,
            Err(_) => break, // peer closed the connection or sent garbage
        };

        if in_send_mode {
            let request = Request::from_u8(msg.cmd)?;
            let replies = handle_send_mode(&request, &msg, msg.id, state_dir)?;
            for reply in &replies {
                write_message(stream, reply).await?;
            }
            continue;
        }

        let request = Request::from_u8(msg.cmd)?;
        let reply = dispatch::handle(request, msg.id, &mut locks, flags, flags.is_private());
        let entered_send_mode = request == Request::SendMode && reply.cmd == Reply::SendMode as u8;
        write_message(stream, &reply).await?;
        if entered_send_mode {
            in_send_mode = true;
        }
    }

    let _ = locks.release();
    Ok(())
}

/// Handle one `SEND_MODE` sub-request, returning the full reply
/// sequence (zero or more `DATA_BLOCK`s terminated by `DATA_END`, or a
/// single non-streaming reply) to write back in order.
fn handle_send_mode(request: &Request, msg: &Message, id: u32, state_dir: &Path) -> Result<Vec<Message>> {
    match request {
        Request::SendRawBuckets => send_mode::stream_raw_file(&state_dir.join(files::BUCKETS), id),
        Request::SendRawIndex => send_mode::stream_raw_file(&state_dir.join(files::INDEX), id),
        Request::SendRawSites => send_mode::stream_raw_file(&state_dir.join(files::SITES), id),
        Request::SendRawParams => send_mode::stream_raw_file(&state_dir.join("params"), id),
        Request::SendBuckets => {
            let store = BucketStore::open(&state_dir.join(files::BUCKETS), false, u64::MAX, 0)?;
            send_mode::stream_buckets(&store, id)
        }
        Request::SendUrls => {
            let offset = match &msg.payload {
                Payload::Attrs(attrs) => attrs.first().and_then(|a| a.as_u64().ok()),
                _ => None,
            };
            let urldb = UrlDb::open(&state_dir.join(files::URLS), false)?;
            send_mode::stream_urls(&urldb, id, offset)
        }
        Request::SendBucket => {
            let fp = match &msg.payload {
                Payload::Attrs(attrs) => attrs
                    .first()
                    .ok_or_else(|| Error::Protocol("SEND_BUCKET missing footprint attribute".into()))?
                    .as_footprint()?,
                _ => return Err(Error::Protocol("SEND_BUCKET requires an attrs payload".into())),
            };
            let mut index = UrlIndex::open(&state_dir.join(files::INDEX), false)?;
            let mut store = BucketStore::open(&state_dir.join(files::BUCKETS), false, u64::MAX, 0)?;
            Ok(vec![send_mode::send_bucket(&mut index, &mut store, fp, id)?])
        }
        Request::SendFeedback => {
            let bytes = match &msg.payload {
                Payload::Raw(bytes) => bytes.clone(),
                _ => Vec::new(),
            };
            send_mode::receive_feedback(&state_dir.join("feedback"), &bytes)?;
            Ok(vec![Message::empty(Mode::SendMode, Reply::Ok as u8, id)])
        }
        _ => Ok(vec![Message::empty(Mode::SendMode, Reply::UnknownReq as u8, id)]),
    }
}
