//! `shep-mirror`: pull a full copy of a peer daemon's state directory
//! over the control protocol's `SEND_MODE` sub-session — the tool a
//! secondary host uses to replicate a primary's crawl state.

use anyhow::{bail, Context, Result};
use clap::Parser;
use shepherd_wire::{Message, Mode, Payload, Reply, Request};
use std::fs::File;
use std::io::Write;
use std::net::TcpStream;
use std::path::PathBuf;

/// Mirror a peer's state directory to a local destination file.
#[derive(Parser, Debug)]
#[command(name = "shep-mirror", version, about)]
struct Args {
    /// Peer daemon address, e.g. `10.0.0.1:4000`.
    #[arg(long)]
    addr: String,

    /// Destination directory to write the mirrored raw files into.
    dest: PathBuf,
}

fn read_reply(stream: &mut TcpStream) -> Result<Message> {
    Message::read_from(stream).context("reading reply")
}

fn send(stream: &mut TcpStream, req: Request, id: u32) -> Result<Message> {
    Message::empty(Mode::Control, req as u8, id).write_to(stream)?;
    read_reply(stream)
}

/// Stream one `SEND_MODE` raw-file request to completion, writing
/// every `DATA_BLOCK`'s bytes to `out` in order.
fn mirror_raw_file(stream: &mut TcpStream, req: Request, id: u32, out: &mut File) -> Result<()> {
    Message::empty(Mode::SendMode, req as u8, id).write_to(stream)?;
    loop {
        let msg = Message::read_from(stream).context("reading SEND_MODE block")?;
        match msg.cmd {
            c if c == Reply::DataBlock as u8 => {
                if let Payload::Raw(bytes) = &msg.payload {
                    out.write_all(bytes)?;
                }
            }
            c if c == Reply::DataEnd as u8 => break,
            other => bail!("unexpected reply {other} while streaming"),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    std::fs::create_dir_all(&args.dest).context("creating destination directory")?;

    let mut stream =
        TcpStream::connect(&args.addr).with_context(|| format!("connecting to {}", args.addr))?;
    let welcome = Message::read_from(&mut stream).context("reading WELCOME")?;
    if welcome.cmd != Reply::Welcome as u8 {
        bail!("peer refused connection (reply code {})", welcome.cmd);
    }

    let borrowed = send(&mut stream, Request::BorrowState, 1)?;
    if borrowed.cmd != Reply::Ok as u8 {
        bail!("BORROW_STATE failed with reply code {}", borrowed.cmd);
    }

    let entered = send(&mut stream, Request::SendMode, 2)?;
    if entered.cmd != Reply::SendMode as u8 {
        bail!("SEND_MODE refused with reply code {}", entered.cmd);
    }

    for (req, name) in [
        (Request::SendRawParams, "params"),
        (Request::SendRawSites, "sites"),
        (Request::SendRawIndex, "index"),
        (Request::SendRawBuckets, "buckets"),
    ] {
        let mut out = File::create(args.dest.join(name))
            .with_context(|| format!("creating {name}"))?;
        mirror_raw_file(&mut stream, req, 3, &mut out)?;
        println!("mirrored {name}");
    }

    Ok(())
}
