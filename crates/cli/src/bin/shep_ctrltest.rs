//! `shep-ctrltest`: a thin control-protocol client, for exercising a
//! running daemon's control-TCP port by hand.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shepherd_wire::{Message, Mode, Reply, Request};
use std::net::TcpStream;

/// Send one control-protocol request and print the reply.
#[derive(Parser, Debug)]
#[command(name = "shep-ctrltest", version, about)]
struct Args {
    /// Daemon address, e.g. `127.0.0.1:4000`.
    #[arg(long)]
    addr: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Liveness check.
    Ping,
    /// Ask the master to enter cleanup once idle.
    SetCleanup,
    /// Ask the master to idle after its current cycle.
    SetIdle,
    /// Ask the master to refuse peer borrow/mirror sessions.
    SetPrivate,
    /// Take the exclusive state lock.
    Lock,
    /// Borrow the current state for reading, blocking until available.
    Borrow,
    /// Borrow the current state, failing immediately if unavailable.
    BorrowNonblocking,
    /// Release a previously borrowed state.
    Return,
    /// Release every lock this connection holds.
    Unlock,
}

fn request_for(cmd: &Cmd) -> Request {
    match cmd {
        Cmd::Ping => Request::Ping,
        Cmd::SetCleanup => Request::SetCleanup,
        Cmd::SetIdle => Request::SetIdle,
        Cmd::SetPrivate => Request::SetPrivate,
        Cmd::Lock => Request::LockState,
        Cmd::Borrow => Request::BorrowState,
        Cmd::BorrowNonblocking => Request::BorrowStateQ,
        Cmd::Return => Request::ReturnState,
        Cmd::Unlock => Request::UnlockStates,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut stream = TcpStream::connect(&args.addr)
        .with_context(|| format!("connecting to {}", args.addr))?;

    let welcome = Message::read_from(&mut stream).context("reading WELCOME")?;
    if welcome.cmd != Reply::Welcome as u8 {
        bail!("expected WELCOME, got reply code {}", welcome.cmd);
    }

    let req = request_for(&args.cmd);
    Message::empty(Mode::Control, req as u8, 1).write_to(&mut stream)?;
    let reply = Message::read_from(&mut stream).context("reading reply")?;

    let decoded = Reply::from_u8(reply.cmd).ok();
    match decoded {
        Some(r) => println!("{r:?}"),
        None => println!("unknown({})", reply.cmd),
    }

    if !matches!(decoded, Some(Reply::Ok) | Some(Reply::Pong)) {
        std::process::exit(1);
    }
    Ok(())
}
