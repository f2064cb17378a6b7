use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use server::config::ServerConfig;
use shared::{OwnerWire, ServerMsg};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<anyhow::Result<()>>,
}

async fn start(pattern_path: PathBuf) -> anyhow::Result<TestServer> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let config = ServerConfig {
        addr: addr.to_string(),
        pattern_path,
        max_npcs: 0,
        ..ServerConfig::default()
    };
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(server::serve(listener, config, rx));
    Ok(TestServer {
        addr,
        shutdown: tx,
        handle,
    })
}

fn missing_pattern() -> PathBuf {
    std::env::temp_dir().join(format!("dogfight-no-pattern-{}.json", std::process::id()))
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, write) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read).lines(),
            write,
        })
    }

    async fn recv(&mut self) -> anyhow::Result<ServerMsg> {
        let line = timeout(WAIT, self.lines.next_line())
            .await??
            .ok_or_else(|| anyhow::anyhow!("server closed the connection"))?;
        Ok(serde_json::from_str(&line)?)
    }

    async fn send_raw(&mut self, line: &str) -> anyhow::Result<()> {
        self.write.write_all(line.as_bytes()).await?;
        self.write.write_all(b"\n").await?;
        Ok(())
    }

    async fn init(&mut self) -> anyhow::Result<(u64, String)> {
        match self.recv().await? {
            ServerMsg::Init { id, color } => Ok((id, color)),
            other => anyhow::bail!("expected init first, got {other:?}"),
        }
    }

    /// Reads snapshots until `pred` accepts one, giving up after `max` of them.
    async fn state_where<F>(&mut self, max: usize, mut pred: F) -> anyhow::Result<ServerMsg>
    where
        F: FnMut(&ServerMsg) -> bool,
    {
        for _ in 0..max {
            let msg = self.recv().await?;
            if pred(&msg) {
                return Ok(msg);
            }
        }
        anyhow::bail!("no matching snapshot within {max} messages")
    }
}

#[tokio::test]
async fn init_arrives_before_any_snapshot() -> anyhow::Result<()> {
    let server = start(missing_pattern()).await?;
    let mut a = Client::connect(server.addr).await?;
    assert_eq!(a.init().await?, (0, "red".to_string()));

    let mut b = Client::connect(server.addr).await?;
    assert_eq!(b.init().await?, (1, "blue".to_string()));

    let msg = b.recv().await?;
    let ServerMsg::State { players, .. } = msg else {
        panic!("expected state after init");
    };
    assert!(players.contains_key("1"));
    Ok(())
}

#[tokio::test]
async fn garbage_line_does_not_drop_the_connection() -> anyhow::Result<()> {
    let server = start(missing_pattern()).await?;
    let mut a = Client::connect(server.addr).await?;
    let (id, _) = a.init().await?;

    a.send_raw(r#"{"d":true,"space":true}"#).await?;
    a.send_raw("{this is not json").await?;
    a.send_raw(r#"{"d":true,"space":false}"#).await?;

    let msg = a
        .state_where(120, |m| match m {
            ServerMsg::State { bullets, players, .. } => {
                let turned = players.get("0").is_some_and(|p| p.2 != 0.0);
                let mine = bullets.iter().any(|b| b.3 == OwnerWire::Player(id));
                turned && mine
            }
            _ => false,
        })
        .await?;
    let ServerMsg::State { bullets, .. } = msg else {
        unreachable!()
    };
    assert_eq!(bullets.len(), 1, "holding then releasing fires once");

    // still connected and still receiving ticks
    a.state_where(5, |m| matches!(m, ServerMsg::State { .. })).await?;
    Ok(())
}

#[tokio::test]
async fn disconnect_removes_player_from_snapshots() -> anyhow::Result<()> {
    let server = start(missing_pattern()).await?;
    let mut a = Client::connect(server.addr).await?;
    a.init().await?;
    let mut b = Client::connect(server.addr).await?;
    let (b_id, _) = b.init().await?;
    let b_key = b_id.to_string();

    a.state_where(120, |m| {
        matches!(m, ServerMsg::State { players, .. } if players.contains_key(&b_key))
    })
    .await?;
    drop(b);

    a.state_where(120, |m| {
        matches!(m, ServerMsg::State { players, .. } if !players.contains_key(&b_key))
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn fire_picks_up_pattern_file() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(format!("dogfight-pattern-{}.json", std::process::id()));
    tokio::fs::write(&path, r#"{"name":"shifted","expression":"40"}"#).await?;

    let server = start(path.clone()).await?;
    let mut a = Client::connect(server.addr).await?;
    let (id, _) = a.init().await?;
    a.send_raw(r#"{"space":true}"#).await?;

    // heading 0 from the spawn point (100, 100); the offset pushes it along +y
    let msg = a
        .state_where(120, |m| {
            matches!(m, ServerMsg::State { bullets, .. }
                if bullets.iter().any(|b| b.3 == OwnerWire::Player(id) && b.0 > 100.0))
        })
        .await?;
    let ServerMsg::State { bullets, .. } = msg else {
        unreachable!()
    };
    let bullet = &bullets[0];
    assert!((bullet.1 - 140.0).abs() < 1e-3, "bullet y = {}", bullet.1);

    let _ = tokio::fs::remove_file(&path).await;
    Ok(())
}

#[tokio::test]
async fn broken_pattern_file_keeps_previous_expression() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(format!("dogfight-kept-{}.json", std::process::id()));
    tokio::fs::write(&path, r#"{"name":"shifted","expression":"40"}"#).await?;

    let server = start(path.clone()).await?;
    let mut a = Client::connect(server.addr).await?;
    let (id, _) = a.init().await?;
    let mine = |m: &ServerMsg, n: usize| match m {
        ServerMsg::State { bullets, .. } => {
            bullets.iter().filter(|b| b.3 == OwnerWire::Player(id)).count() >= n
        }
        _ => false,
    };

    a.send_raw(r#"{"space":true}"#).await?;
    a.state_where(120, |m| mine(m, 1)).await?;

    tokio::fs::write(&path, "{ not json").await?;
    a.send_raw(r#"{"space":false}"#).await?;
    a.send_raw(r#"{"space":true}"#).await?;
    a.state_where(120, |m| mine(m, 2)).await?;

    tokio::fs::remove_file(&path).await?;
    a.send_raw(r#"{"space":false}"#).await?;
    a.send_raw(r#"{"space":true}"#).await?;
    let msg = a.state_where(120, |m| mine(m, 3)).await?;

    let ServerMsg::State { bullets, .. } = msg else {
        unreachable!()
    };
    // all three shots left (100, 100) heading +x with the cached offset of 40
    for bullet in bullets.iter().filter(|b| b.3 == OwnerWire::Player(id)) {
        assert!((bullet.1 - 140.0).abs() < 1e-3, "bullet y = {}", bullet.1);
    }
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_serving_and_closes_listener() -> anyhow::Result<()> {
    let server = start(missing_pattern()).await?;
    let mut a = Client::connect(server.addr).await?;
    a.init().await?;

    server.shutdown.send(true)?;
    timeout(WAIT, server.handle).await???;

    assert!(TcpStream::connect(server.addr).await.is_err());
    Ok(())
}

#[tokio::test]
async fn oversized_line_is_dropped_and_next_line_applies() -> anyhow::Result<()> {
    let server = start(missing_pattern()).await?;
    let mut a = Client::connect(server.addr).await?;
    let (id, _) = a.init().await?;
    let key = id.to_string();

    let flood = "a".repeat(server::net::MAX_LINE * 64);
    a.send_raw(&flood).await?;
    a.send_raw(r#"{"d":true}"#).await?;

    a.state_where(240, |m| {
        matches!(m, ServerMsg::State { players, .. }
            if players.get(&key).is_some_and(|p| p.2 != 0.0))
    })
    .await?;
    Ok(())
}
