//! Bulletin boards, signs, and switches.
//!
//! A board id is either a free-form virtual board name or the
//! `BULLETIN_BOARD@x,y,z` id of a physical board block. Physical boards
//! must be in reach and, on claimed land, posting follows the land's
//! trade flag for visitors.

use serde_json::{Value, json};
use voxelcraft_types::{AgentId, ErrorCode, Event, EventKind, InstantReq, PostId, Vec3i};

use super::{Accepted, Outcome, REACH_CONTAINER, Rejection, rate_limit, required, within_reach};
use crate::config::RATE_POST_BOARD;
use crate::entities::{Board, BoardPost, entity_id, parse_entity_id};
use crate::world::{Counters, World};

/// Longest accepted post title, in bytes.
pub const MAX_TITLE_LEN: usize = 80;

/// Longest accepted post body, in bytes.
pub const MAX_BODY_LEN: usize = 2000;

/// Longest accepted sign text, in bytes.
pub const MAX_SIGN_LEN: usize = 200;

/// Default and maximum SEARCH_BOARD page sizes.
pub const SEARCH_DEFAULT_LIMIT: usize = 20;
/// Upper bound on SEARCH_BOARD results.
pub const SEARCH_MAX_LIMIT: usize = 50;

/// Resolve `board_id`, checking a physical board's block, reach, and land.
/// Returns the canonical id.
fn resolve_board(w: &World, agent_id: &str, board_id: &str) -> Result<String, Rejection> {
    let Some((kind, pos)) = parse_entity_id(board_id) else {
        return Ok(board_id.to_owned());
    };
    if kind != "BULLETIN_BOARD" {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "invalid board target"));
    }
    if !w.block_is(pos, "BULLETIN_BOARD") {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "bulletin board not found"));
    }
    within_reach(w, agent_id, pos, REACH_CONTAINER)?;
    if let Some(land) = w.land_at(pos) {
        if !w.is_land_member(agent_id, land) && !land.flags.allow_trade {
            return Err(Rejection::new(ErrorCode::NoPermission, "posting not allowed here"));
        }
    }
    Ok(entity_id("BULLETIN_BOARD", pos))
}

/// Resolve a `KIND@x,y,z` block entity that must be in reach.
fn resolve_block(w: &World, agent_id: &str, target_id: &str, kind: &str, what: &str) -> Result<Vec3i, Rejection> {
    let target_id = required(target_id, "target_id")?;
    let (k, pos) = parse_entity_id(target_id)
        .filter(|(k, _)| *k == kind)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, format!("invalid {what} target")))?;
    if k != kind || !w.block_is(pos, kind) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, format!("{what} not found")));
    }
    within_reach(w, agent_id, pos, REACH_CONTAINER)?;
    Ok(pos)
}

/// JSON view of a post.
pub fn post_json(p: &BoardPost) -> Value {
    json!({
        "post_id": p.post_id.as_str(),
        "author": p.author.as_str(),
        "title": p.title,
        "body": p.body,
        "tick": p.tick,
    })
}

/// POST_BOARD to a virtual or physical board.
pub fn post_board(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    rate_limit(w, agent_id.as_str(), RATE_POST_BOARD, now)?;
    let raw = if req.board_id.trim().is_empty() {
        req.target_id.as_str()
    } else {
        req.board_id.as_str()
    };
    let raw = required(raw, "board_id")?;
    if req.title.len() > MAX_TITLE_LEN || req.body.len() > MAX_BODY_LEN {
        return Err(Rejection::new(ErrorCode::BadRequest, "post too large"));
    }
    let board_id = resolve_board(w, agent_id.as_str(), raw)?;

    let post_id = PostId::from_counter(Counters::next(&mut w.counters.post));
    w.boards.entry(board_id.clone()).or_default().push(BoardPost {
        post_id: post_id.clone(),
        author: agent_id.clone(),
        title: req.title.clone(),
        body: req.body.clone(),
        tick: now,
    });
    let pos = parse_entity_id(&board_id).map_or(Vec3i::ZERO, |(_, p)| p);
    let entry = w
        .audit_entry(agent_id.as_str(), "BOARD_POST", pos, "POST_BOARD")
        .detail("board_id", board_id.as_str())
        .detail("post_id", post_id.as_str())
        .detail("title", req.title.as_str());
    w.audit(entry);
    Ok(Accepted::new("posted").with("post_id", post_id.as_str()))
}

/// SEARCH_BOARD: case-insensitive substring match, newest first.
pub fn search_board(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    let raw = if req.board_id.trim().is_empty() {
        req.target_id.as_str()
    } else {
        req.board_id.as_str()
    };
    let raw = required(raw, "board_id")?;
    let query = required(&req.text, "text")?.to_owned();
    let limit = match usize::try_from(req.limit) {
        Ok(0) | Err(_) => SEARCH_DEFAULT_LIMIT,
        Ok(n) => n.clamp(1, SEARCH_MAX_LIMIT),
    };
    let board_id = resolve_board(w, agent_id.as_str(), raw)?;
    let board: &Board = w
        .boards
        .get(&board_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "board not found"))?;
    let needle = query.to_lowercase();
    let results: Vec<Value> = board
        .posts
        .iter()
        .rev()
        .filter(|p| p.matches(&needle))
        .take(limit)
        .map(post_json)
        .collect();
    let total = board.posts.len();
    let ev = Event::new(now, EventKind::BoardSearch)
        .with("board_id", board_id.as_str())
        .with("query", query.as_str())
        .with("total_posts", total)
        .with("results", results);
    w.emit(agent_id.as_str(), ev);
    Ok(Accepted::new("ok"))
}

/// SET_SIGN text on a sign block in reach.
pub fn set_sign(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    let pos = resolve_block(w, agent_id.as_str(), &req.target_id, "SIGN", "sign")?;
    if req.text.len() > MAX_SIGN_LEN {
        return Err(Rejection::new(ErrorCode::BadRequest, "text too large"));
    }
    if !w.can_build_at(agent_id.as_str(), pos, now) {
        return Err(Rejection::new(w.deny(agent_id.as_str(), now), "sign edit denied"));
    }
    let sign = w.signs.entry(pos).or_default();
    sign.text.clone_from(&req.text);
    sign.updated_tick = now;
    agent_id.as_str().clone_into(&mut sign.updated_by);
    let entry = w
        .audit_entry(agent_id.as_str(), "SIGN_SET", pos, "SET_SIGN")
        .detail("sign_id", entity_id("SIGN", pos))
        .detail("text", req.text.as_str())
        .detail("text_length", req.text.len());
    w.audit(entry);
    Ok(Accepted::new("ok"))
}

/// TOGGLE_SWITCH on a switch block in reach.
pub fn toggle_switch(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    let pos = resolve_block(w, agent_id.as_str(), &req.target_id, "SWITCH", "switch")?;
    if !w.can_build_at(agent_id.as_str(), pos, now) {
        return Err(Rejection::new(w.deny(agent_id.as_str(), now), "switch toggle denied"));
    }
    let state = w.switches.entry(pos).or_insert(false);
    *state = !*state;
    let on = *state;
    let switch_id = entity_id("SWITCH", pos);
    let entry = w
        .audit_entry(agent_id.as_str(), "SWITCH_TOGGLE", pos, "TOGGLE_SWITCH")
        .detail("switch_id", switch_id.as_str())
        .detail("on", on);
    w.audit(entry);
    let ev = Event::new(now, EventKind::Switch)
        .with("switch_id", switch_id.as_str())
        .with_pos("pos", pos)
        .with("on", on);
    w.emit(agent_id.as_str(), ev);
    Ok(Accepted::new("ok"))
}
