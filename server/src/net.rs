use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use shared::{ClientInput, ServerMsg};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::pattern::read_pattern_file;
use crate::player::PlayerId;
use crate::world::{ClientTx, Outbound, SharedWorld, World, OUTBOUND_QUEUE};

/// Longest accepted input line, terminator included.
pub const MAX_LINE: usize = 1024;

/// Turns a held fire button into one press.
#[derive(Debug, Default, Clone, Copy)]
pub struct FireLatch {
    last: bool,
}

impl FireLatch {
    /// True only on a false to true transition.
    pub fn observe(&mut self, pressed: bool) -> bool {
        let rising = pressed && !self.last;
        self.last = pressed;
        rising
    }
}

/// One input line, without its terminator. `None` for anything that is not a
/// well-formed control record.
pub fn decode_input(line: &[u8]) -> Option<ClientInput> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match serde_json::from_slice(line) {
        Ok(input) => Some(input),
        Err(err) => {
            debug!(%err, len = line.len(), "dropping undecodable input line");
            None
        }
    }
}

pub async fn accept_loop(
    listener: TcpListener,
    world: SharedWorld,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            res = listener.accept() => res,
            _ = shutdown.changed() => break,
        };
        match accepted {
            Ok((stream, addr)) => {
                let world = Arc::clone(&world);
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, addr, world, config).await {
                        warn!(%addr, "client error: {err:#}");
                    }
                });
            }
            Err(err) => {
                warn!(%err, "accept failed");
            }
        }
    }
    info!("no longer accepting connections");
}

/// Adds a player for a new connection and queues its `init` line ahead of any
/// snapshot. The caller holds the world lock, so the loop cannot broadcast first.
pub fn admit(w: &mut World, tx: ClientTx) -> Result<PlayerId> {
    let id = w.join();
    let color = w.players.get(&id).map(|p| p.color).unwrap_or_default();
    let init = match serde_json::to_string(&ServerMsg::Init {
        id,
        color: color.to_string(),
    }) {
        Ok(line) => line,
        Err(err) => {
            w.leave(id);
            return Err(err).context("serialize init message");
        }
    };
    // fresh queue, cannot be full
    let _ = tx.try_send(init.into());
    w.register_client(id, tx);
    Ok(id)
}

async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    world: SharedWorld,
    config: Arc<ServerConfig>,
) -> Result<()> {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%addr, %err, "could not disable nagle");
    }
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);

    let id = admit(&mut *world.lock().await, tx)?;
    info!(player_id = id, %addr, "player connected");

    let write_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let result = read_inputs(read_half, id, &world, &config).await;

    write_task.abort();
    world.lock().await.leave(id);
    match &result {
        Ok(()) => info!(player_id = id, %addr, "player disconnected"),
        Err(err) => info!(player_id = id, %addr, %err, "player dropped"),
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line,
    /// Longer than [`MAX_LINE`]; already skipped through its newline.
    Oversized,
    Eof,
}

/// Reads one newline-terminated frame into `buf`, never holding more than
/// [`MAX_LINE`] bytes of it.
async fn next_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader).take(MAX_LINE as u64).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') || buf.len() < MAX_LINE {
        return Ok(Frame::Line);
    }

    buf.clear();
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(Frame::Eof);
        }
        match chunk.iter().position(|b| *b == b'\n') {
            Some(i) => {
                reader.consume(i + 1);
                return Ok(Frame::Oversized);
            }
            None => {
                let len = chunk.len();
                reader.consume(len);
            }
        }
    }
}

async fn read_inputs(
    read_half: OwnedReadHalf,
    id: PlayerId,
    world: &SharedWorld,
    config: &ServerConfig,
) -> io::Result<()> {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    let mut fire = FireLatch::default();

    loop {
        match next_frame(&mut reader, &mut buf).await? {
            Frame::Eof => return Ok(()),
            Frame::Oversized => {
                debug!(player_id = id, limit = MAX_LINE, "dropping oversized input line");
                continue;
            }
            Frame::Line => {}
        }
        let Some(input) = decode_input(&buf) else {
            continue;
        };

        let fired = fire.observe(input.space);
        // file I/O stays outside the lock
        let pattern = if fired {
            match read_pattern_file(&config.pattern_path).await {
                Ok(file) => Some(file),
                Err(err) => {
                    debug!(path = %config.pattern_path.display(), %err, "pattern file not loaded");
                    None
                }
            }
        } else {
            None
        };

        let mut w = world.lock().await;
        if let Some(file) = pattern {
            w.offer_pattern(file);
        }
        w.set_input(id, input);
        if fired {
            w.queue_fire(id);
        }
    }
}
