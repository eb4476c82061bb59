//! Server bootstrap and accept loop.
//!
//! Owns the space manager, auth store and connection limiter; accepts data
//! plane connections, admits them through the limiter and hands each to a
//! session task. A sibling task serves the HTTP control plane, and unix
//! user signals nudge the limit by 100 either way. Shutdown (SIGINT or
//! SIGTERM) closes every space before returning.

use crate::admission::{ConnectionLimiter, DEFAULT_NUDGE};
use crate::control;
use crate::session::{run_session, SessionContext};
use crate::wire::Reply;
use axon_core::error::Result;
use axon_core::ServerConfig;
use axon_engine::{AuthStore, SpaceManager};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// One server instance, bound but not yet serving
pub struct Server {
    manager: Arc<SpaceManager>,
    auth: Arc<AuthStore>,
    limiter: Arc<ConnectionLimiter>,
    listener: TcpListener,
    control_listener: TcpListener,
}

impl Server {
    /// Open all persistent state and bind both listeners.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let manager = Arc::new(SpaceManager::open(&config.data_dir)?);
        let auth = Arc::new(AuthStore::open(&config.data_dir)?);
        let limiter = Arc::new(ConnectionLimiter::open(
            &config.data_dir,
            config.max_connections,
        )?);

        let listener = TcpListener::bind(config.bind).await?;
        let mut control_bind = config.control_bind();
        if config.bind.port() == 0 {
            // Ephemeral data port: derive the control port from the port
            // the OS actually handed us
            control_bind.set_port(listener.local_addr()?.port().wrapping_add(1000));
        }
        let control_listener = TcpListener::bind(control_bind).await?;
        let data_addr = listener.local_addr()?;
        let control_addr = control_listener.local_addr()?;
        info!(data = %data_addr, control = %control_addr, "axondb listening");

        Ok(Server {
            manager,
            auth,
            limiter,
            listener,
            control_listener,
        })
    }

    /// Bound data-plane address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Bound control-plane address.
    pub fn control_addr(&self) -> Result<SocketAddr> {
        Ok(self.control_listener.local_addr()?)
    }

    /// Shared limiter handle (signal tasks, tests).
    pub fn limiter(&self) -> Arc<ConnectionLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Serve until SIGINT/SIGTERM, then close every space.
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then close every space.
    pub async fn run_with_shutdown(self, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        let Server {
            manager,
            auth,
            limiter,
            listener,
            control_listener,
        } = self;

        let control = control::router(Arc::clone(&limiter), "axondb");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(control_listener, control).await {
                error!("control plane failed: {}", e);
            }
        });
        spawn_signal_nudges(Arc::clone(&limiter));

        let ctx = SessionContext {
            manager: Arc::clone(&manager),
            auth,
        };

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    admit(&limiter, stream, peer, ctx.clone());
                }
                _ = &mut shutdown => break,
            }
        }

        info!("shutting down, closing spaces");
        manager.close_all();
        Ok(())
    }
}

/// Admit or reject one accepted connection.
fn admit(limiter: &Arc<ConnectionLimiter>, stream: TcpStream, peer: SocketAddr, ctx: SessionContext) {
    if !limiter.try_acquire(peer) {
        let max = limiter.max();
        debug!(%peer, "rejecting connection at capacity");
        tokio::spawn(async move {
            let reply = Reply::error(format!(
                "Server at maximum capacity ({} connections). Please try again later.",
                max
            ));
            let mut line = reply.to_line();
            line.push('\n');
            let mut stream = stream;
            let _ = stream.write_all(line.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
        return;
    }

    let limiter = Arc::clone(limiter);
    tokio::spawn(async move {
        run_session(ctx, stream, peer).await;
        limiter.release(peer);
    });
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("cannot install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

/// SIGUSR1 raises the limit by 100, SIGUSR2 lowers it by 100 floored at
/// the active count. Best-effort; failures only log.
fn spawn_signal_nudges(limiter: Arc<ConnectionLimiter>) {
    use tokio::signal::unix::{signal, SignalKind};

    let up = Arc::clone(&limiter);
    tokio::spawn(async move {
        let Ok(mut stream) = signal(SignalKind::user_defined1()) else {
            warn!("cannot install SIGUSR1 handler");
            return;
        };
        while stream.recv().await.is_some() {
            match up.increase(DEFAULT_NUDGE) {
                Ok(limit) => info!(limit, "limit raised via SIGUSR1"),
                Err(e) => warn!("SIGUSR1 limit raise failed: {}", e),
            }
        }
    });

    tokio::spawn(async move {
        let Ok(mut stream) = signal(SignalKind::user_defined2()) else {
            warn!("cannot install SIGUSR2 handler");
            return;
        };
        while stream.recv().await.is_some() {
            match limiter.decrease_clamped(DEFAULT_NUDGE) {
                Ok(limit) => info!(limit, "limit lowered via SIGUSR2"),
                Err(e) => warn!("SIGUSR2 limit lower failed: {}", e),
            }
        }
    });
}
