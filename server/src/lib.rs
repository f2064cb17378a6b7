//! Authoritative dogfight server.
//!
//! Clients send control records as newline-delimited JSON; a fixed-rate loop owns
//! every entity and pushes a full snapshot to each connection once per tick.

pub mod config;
pub mod geometry;
pub mod hostile;
pub mod net;
pub mod pattern;
pub mod player;
pub mod projectile;
pub mod sim;
pub mod world;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::world::World;

/// Runs the simulation and accepts connections on `listener` until `shutdown`
/// flips or the simulation fails.
pub async fn serve(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let world = World::new(&config).into_shared();
    let config = Arc::new(config);

    let mut sim = tokio::spawn(sim::run(
        Arc::clone(&world),
        config.tick_hz,
        shutdown.clone(),
    ));
    let accept = net::accept_loop(listener, world, Arc::clone(&config), shutdown);

    tokio::select! {
        res = &mut sim => res.context("simulation task panicked")?,
        () = accept => sim.await.context("simulation task panicked")?,
    }
}
