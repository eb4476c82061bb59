//! Per-connection session dispatcher.
//!
//! State machine per accepted socket: the first line must be a login; every
//! later line decodes as a query, passes the permission policy, dispatches
//! to the right engine and gets exactly one reply line. Post-login errors
//! keep the session open; it ends on EOF, read error, or a malformed first
//! frame.

use crate::wire::{LoginRequest, Query, Reply, SearchHit};
use axon_core::error::{Error, Result};
use axon_core::{DistanceMetric, EngineKind, Role, SpaceMeta, UserInfo};
use axon_engine::{AuthStore, SpaceManager};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Default `k` when a `SEARCH_TOPK` query carries none
const DEFAULT_TOP_K: usize = 10;

/// Shared handles a session dispatches against
#[derive(Clone)]
pub struct SessionContext {
    pub manager: Arc<SpaceManager>,
    pub auth: Arc<AuthStore>,
}

/// Drive one connection to completion.
pub async fn run_session(ctx: SessionContext, stream: TcpStream, peer: std::net::SocketAddr) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Unauthenticated: exactly one login attempt
    let user = match login(&ctx, &mut lines, &mut write_half).await {
        Some(user) => user,
        None => return,
    };
    debug!(%peer, user = %user.username, "session authenticated");

    // Authenticated: one reply per line until EOF or a write failure
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let query = match serde_json::from_str::<Query>(&line) {
            Ok(query) => query,
            Err(e) => {
                // Undecodable frame: one error line, then drop the session
                let reply = Reply::error(format!("malformed request: {}", e));
                let _ = write_line(&mut write_half, &reply).await;
                break;
            }
        };
        let reply = dispatch(&ctx, query, &user);
        if write_line(&mut write_half, &reply).await.is_err() {
            break;
        }
    }
    debug!(%peer, "session closed");
}

async fn login(
    ctx: &SessionContext,
    lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>,
    write_half: &mut OwnedWriteHalf,
) -> Option<UserInfo> {
    let line = match lines.next_line().await {
        Ok(Some(line)) => line,
        _ => return None,
    };
    let reply = serde_json::from_str::<LoginRequest>(&line)
        .map_err(|e| Error::AuthFailed(format!("malformed login: {}", e)))
        .and_then(|login| ctx.auth.verify(&login.username, &login.password));
    match reply {
        Ok(user) => {
            write_line(write_half, &Reply::ok_user(user.clone()))
                .await
                .ok()?;
            Some(user)
        }
        Err(e) => {
            let _ = write_line(write_half, &Reply::error(e.to_string())).await;
            None
        }
    }
}

async fn write_line(write_half: &mut OwnedWriteHalf, reply: &Reply) -> std::io::Result<()> {
    let mut line = reply.to_line();
    line.push('\n');
    write_half.write_all(line.as_bytes()).await
}

/// Policy-check then execute one query, mapping failures to error replies.
pub fn dispatch(ctx: &SessionContext, query: Query, user: &UserInfo) -> Reply {
    let kind = query.kind.to_uppercase();
    if let Err(e) = authorize(&kind, &query, user) {
        return Reply::error(e.to_string());
    }
    match execute(ctx, &kind, query, user) {
        Ok(reply) => reply,
        Err(e) => Reply::error(e.to_string()),
    }
}

/// The permission policy table.
fn authorize(kind: &str, query: &Query, user: &UserInfo) -> Result<()> {
    let space = || query.space.as_deref().unwrap_or("");
    let denied = |what: &str| {
        Err(Error::PermissionDenied(format!(
            "user {} lacks {} access for {}",
            user.username, what, kind
        )))
    };

    match kind {
        "CREATE_SPACE" | "LIST_SPACES" | "DELETE_SPACE" => {
            if user.is_admin() {
                Ok(())
            } else {
                denied("admin")
            }
        }
        _ if kind.ends_with("_USER") => {
            if user.is_admin() {
                Ok(())
            } else {
                denied("admin")
            }
        }
        "PUT" | "DELETE" | "INSERT_VECTOR" | "DELETE_VECTOR" => {
            if user.can_write(space()) {
                Ok(())
            } else {
                denied("write")
            }
        }
        "GET" | "SEARCH_TOPK" | "GET_VECTOR" | "RANGE_SEARCH" | "SPACE_META" => {
            if user.can_read(space()) {
                Ok(())
            } else {
                denied("read")
            }
        }
        // Any authenticated user may switch spaces; unknown kinds fail
        // later in execute with a clearer message
        _ => Ok(()),
    }
}

fn execute(ctx: &SessionContext, kind: &str, query: Query, _user: &UserInfo) -> Result<Reply> {
    match kind {
        "PUT" => {
            let space = require(&query.space, "space")?;
            let key = require(&query.key, "key")?;
            let value = require(&query.value, "value")?;
            ctx.manager.get_space(space)?.as_kv(space)?.put(key, value)?;
            Ok(Reply::ok_message("OK"))
        }
        "GET" => {
            let space = require(&query.space, "space")?;
            let key = require(&query.key, "key")?;
            let value = ctx.manager.get_space(space)?.as_kv(space)?.get(key)?;
            Ok(Reply::ok_value(value))
        }
        "DELETE" => {
            let space = require(&query.space, "space")?;
            let key = require(&query.key, "key")?;
            ctx.manager.get_space(space)?.as_kv(space)?.delete(key)?;
            Ok(Reply::ok_message("DELETED"))
        }
        "INSERT_VECTOR" => {
            let space = require(&query.space, "space")?;
            let id = parse_id(require(&query.key, "key")?)?;
            let vector = parse_csv(require(&query.value, "value")?)?;
            ctx.manager
                .get_space(space)?
                .as_vector(space)?
                .insert(id, &vector)?;
            Ok(Reply::ok_message("VECTOR_INSERTED"))
        }
        "DELETE_VECTOR" => {
            let space = require(&query.space, "space")?;
            let id = parse_id(require(&query.key, "key")?)?;
            ctx.manager
                .get_space(space)?
                .as_vector(space)?
                .remove(id)?;
            Ok(Reply::ok_message("VECTOR_DELETED"))
        }
        "SEARCH_TOPK" => {
            let space = require(&query.space, "space")?;
            let vector = parse_csv(require(&query.value, "value")?)?;
            // k rides in `dimension`
            let k = query
                .dimension
                .map(|k| k.max(1) as usize)
                .unwrap_or(DEFAULT_TOP_K);
            let hits = ctx
                .manager
                .get_space(space)?
                .as_vector(space)?
                .search(&vector, k)?;
            Ok(Reply::ok_value(encode_hits(&hits)?))
        }
        "RANGE_SEARCH" => {
            let space = require(&query.space, "space")?;
            let vector = parse_csv(require(&query.value, "value")?)?;
            let radius = query
                .radius
                .ok_or_else(|| Error::InvalidInput("missing field: radius".into()))?;
            let hits = ctx
                .manager
                .get_space(space)?
                .as_vector(space)?
                .range_search(&vector, radius as f32)?;
            Ok(Reply::ok_value(encode_hits(&hits)?))
        }
        "GET_VECTOR" => {
            let space = require(&query.space, "space")?;
            let id = parse_id(require(&query.key, "key")?)?;
            let vector = ctx
                .manager
                .get_space(space)?
                .as_vector(space)?
                .get_vector(id)?;
            let csv: Vec<String> = vector.iter().map(f32::to_string).collect();
            Ok(Reply::ok_value(csv.join(",")))
        }
        "CREATE_SPACE" => {
            let space = require(&query.space, "space")?;
            let engine_kind = query
                .engine_type
                .as_deref()
                .unwrap_or("key-value")
                .parse::<EngineKind>()?;
            let meta = match engine_kind {
                EngineKind::KeyValue => {
                    SpaceMeta::key_value(space, query.enable_wal.unwrap_or(true))
                }
                EngineKind::Vector => {
                    let dim = query
                        .dimension
                        .ok_or_else(|| Error::InvalidInput("missing field: dimension".into()))?;
                    if dim <= 0 {
                        return Err(Error::InvalidInput(
                            "dimension must be positive".into(),
                        ));
                    }
                    let metric = DistanceMetric::from_str(
                        query.metric.as_deref().unwrap_or("L2"),
                    )?;
                    SpaceMeta::vector(
                        space,
                        dim as usize,
                        query.index_type.as_deref().unwrap_or("Flat"),
                        metric,
                        query.enable_wal.unwrap_or(false),
                    )
                }
            };
            ctx.manager.create_space(meta)?;
            Ok(Reply::ok_message("SPACE_CREATED"))
        }
        "DELETE_SPACE" => {
            let space = require(&query.space, "space")?;
            ctx.manager.delete_space(space)?;
            Ok(Reply::ok_message("SPACE_DELETED"))
        }
        "USE_SPACE" => {
            let space = require(&query.space, "space")?;
            ctx.manager.use_space(space)?;
            Ok(Reply::ok_message("SPACE_CHANGED"))
        }
        "LIST_SPACES" => Ok(Reply::ok_spaces(ctx.manager.list_spaces())),
        "SPACE_META" => {
            let space = require(&query.space, "space")?;
            let meta = ctx.manager.space_meta(space)?;
            Ok(Reply::ok_value(serde_json::to_string(&meta)?))
        }
        "CREATE_USER" => {
            let username = require(&query.new_user, "new_user")?;
            let password = require(&query.data, "data")?;
            let role = query
                .value
                .as_deref()
                .map(Role::from_str)
                .transpose()?
                .unwrap_or(Role::Read);
            ctx.auth.create_user(username, password, role)?;
            Ok(Reply::ok_message("USER_CREATED"))
        }
        "DELETE_USER" => {
            let username = require(&query.delete_user, "delete_user")?;
            ctx.auth.delete_user(username)?;
            Ok(Reply::ok_message("USER_DELETED"))
        }
        "GRANT_USER" => {
            let username = require(&query.user, "user")?;
            let space = require(&query.space, "space")?;
            let role = Role::from_str(require(&query.value, "value")?)?;
            ctx.manager.use_space(space)?;
            ctx.auth.grant(username, space, role)?;
            Ok(Reply::ok_message("PERMISSION_GRANTED"))
        }
        other => Err(Error::InvalidInput(format!(
            "unknown command type: {}",
            other
        ))),
    }
}

fn require<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
    field
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("missing field: {}", name)))
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| Error::InvalidInput(format!("invalid vector id: {}", raw)))
}

fn parse_csv(raw: &str) -> Result<Vec<f32>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|_| Error::InvalidInput(format!("invalid float: {}", part.trim())))
        })
        .collect()
}

fn encode_hits(hits: &[(i64, f32)]) -> Result<String> {
    let hits: Vec<SearchHit> = hits
        .iter()
        .map(|&(id, distance)| SearchHit { id, distance })
        .collect();
    Ok(serde_json::to_string(&hits)?)
}
