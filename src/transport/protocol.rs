//! Ring Wire Protocol
//!
//! Requests are a single text line `<OPCODE>[,<args>]`; the response is whatever the
//! server writes before closing the connection:
//!
//! - nothing (request dropped, or a lookup with no answer),
//! - the acknowledgement [`ACK`],
//! - a peer encoding `<id>,<ip>,<port>`,
//! - a JSON document.
//!
//! Discovery and summary traffic travel as UDP datagrams (`JOIN,<id>,<ip>,<port>` and
//! `<TAG>|<json>`).

use super::types::PeerHandle;
use crate::ring::NodeId;
use serde_json::Value;

// --- Opcodes ---

pub const OP_FIND_SUCCESSOR: &str = "FIND_SUCCESSOR";
pub const OP_FIND_PREDECESSOR: &str = "FIND_PREDECESSOR";
pub const OP_GET_SUCCESSOR: &str = "GET_SUCCESSOR";
pub const OP_GET_PREDECESSOR: &str = "GET_PREDECESSOR";
pub const OP_NOTIFY: &str = "NOTIFY";
pub const OP_CHECK: &str = "CHECK";
pub const OP_CLOSEST_PRECEDING_FINGER: &str = "CLOSEST_PRECEDING_FINGER";
pub const OP_STORE_KEY: &str = "STORE_KEY";
pub const OP_RETRIEVE_KEY: &str = "RETRIEVE_KEY";
pub const OP_UPDATE_SUCCESSOR: &str = "UPDATE_SUCCESSOR";
pub const OP_UPDATE_PREDECESSOR: &str = "UPDATE_PREDECESSOR";
pub const OP_SEND_DATA: &str = "SEND_DATA";
/// Application pass-through: run a registered job handler against a stored record.
pub const OP_SUBMIT_JOB: &str = "SUBMIT_JOB";
/// Application pass-through: list the records held by the node.
pub const OP_FETCH_SUMMARIES: &str = "FETCH_SUMMARIES";
/// Application pass-through: write a job outcome back through the ring.
pub const OP_REPORT_RESULT: &str = "REPORT_RESULT";

/// Literal acknowledgement for commands that only mutate state.
pub const ACK: &str = "OK";

/// Tag of the discovery datagram.
pub const JOIN_TAG: &str = "JOIN";

/// Upper bound on a single request line.
pub const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;

/// Keys travel unescaped inside `|`-separated, newline-terminated requests.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['|', '\n', '\r'])
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    FindSuccessor(NodeId),
    FindPredecessor(NodeId),
    GetSuccessor,
    GetPredecessor,
    Notify(PeerHandle),
    Check,
    ClosestPrecedingFinger(NodeId),
    StoreKey { key: String, value: Value },
    RetrieveKey(String),
    UpdateSuccessor(PeerHandle),
    UpdatePredecessor(PeerHandle),
    SendData,
    SubmitJob { handler: String, key: String },
    FetchSummaries,
    ReportResult { key: String, value: Value },
}

impl Command {
    /// Decodes one request line. Anything unknown or malformed yields `None` and is
    /// dropped by the dispatcher without a response.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (op, args) = line.split_once(',').unwrap_or((line, ""));

        match op {
            OP_FIND_SUCCESSOR => args.parse().ok().map(Command::FindSuccessor),
            OP_FIND_PREDECESSOR => args.parse().ok().map(Command::FindPredecessor),
            OP_GET_SUCCESSOR => Some(Command::GetSuccessor),
            OP_GET_PREDECESSOR => Some(Command::GetPredecessor),
            OP_NOTIFY => PeerHandle::decode(args).map(Command::Notify),
            OP_CHECK => Some(Command::Check),
            OP_CLOSEST_PRECEDING_FINGER => args.parse().ok().map(Command::ClosestPrecedingFinger),
            OP_STORE_KEY => {
                let (key, value) = parse_keyed_json(args)?;
                Some(Command::StoreKey { key, value })
            }
            OP_RETRIEVE_KEY => is_valid_key(args).then(|| Command::RetrieveKey(args.to_string())),
            OP_UPDATE_SUCCESSOR => PeerHandle::decode(args).map(Command::UpdateSuccessor),
            OP_UPDATE_PREDECESSOR => PeerHandle::decode(args).map(Command::UpdatePredecessor),
            OP_SEND_DATA => Some(Command::SendData),
            OP_SUBMIT_JOB => {
                let (handler, key) = args.split_once(',')?;
                if handler.is_empty() || !is_valid_key(key) {
                    return None;
                }
                Some(Command::SubmitJob {
                    handler: handler.to_string(),
                    key: key.to_string(),
                })
            }
            OP_FETCH_SUMMARIES => Some(Command::FetchSummaries),
            OP_REPORT_RESULT => {
                let (key, value) = parse_keyed_json(args)?;
                Some(Command::ReportResult { key, value })
            }
            _ => None,
        }
    }

    /// Encodes the request line, without the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Command::FindSuccessor(id) => format!("{},{}", OP_FIND_SUCCESSOR, id),
            Command::FindPredecessor(id) => format!("{},{}", OP_FIND_PREDECESSOR, id),
            Command::GetSuccessor => OP_GET_SUCCESSOR.to_string(),
            Command::GetPredecessor => OP_GET_PREDECESSOR.to_string(),
            Command::Notify(peer) => format!("{},{}", OP_NOTIFY, peer.encode()),
            Command::Check => OP_CHECK.to_string(),
            Command::ClosestPrecedingFinger(id) => {
                format!("{},{}", OP_CLOSEST_PRECEDING_FINGER, id)
            }
            Command::StoreKey { key, value } => format!("{},{}|{}", OP_STORE_KEY, key, value),
            Command::RetrieveKey(key) => format!("{},{}", OP_RETRIEVE_KEY, key),
            Command::UpdateSuccessor(peer) => format!("{},{}", OP_UPDATE_SUCCESSOR, peer.encode()),
            Command::UpdatePredecessor(peer) => {
                format!("{},{}", OP_UPDATE_PREDECESSOR, peer.encode())
            }
            Command::SendData => OP_SEND_DATA.to_string(),
            Command::SubmitJob { handler, key } => format!("{},{},{}", OP_SUBMIT_JOB, handler, key),
            Command::FetchSummaries => OP_FETCH_SUMMARIES.to_string(),
            Command::ReportResult { key, value } => {
                format!("{},{}|{}", OP_REPORT_RESULT, key, value)
            }
        }
    }
}

fn parse_keyed_json(args: &str) -> Option<(String, Value)> {
    let (key, json) = args.split_once('|')?;
    if !is_valid_key(key) {
        return None;
    }
    let value = serde_json::from_str(json).ok()?;
    Some((key.to_string(), value))
}

/// What the dispatcher writes back before closing.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Peer(PeerHandle),
    Ack,
    Json(Value),
    Empty,
}

impl Reply {
    /// Response body, or `None` when the connection should close silently.
    pub fn into_wire(self) -> Option<String> {
        match self {
            Reply::Peer(peer) => Some(peer.encode()),
            Reply::Ack => Some(ACK.to_string()),
            Reply::Json(value) => Some(value.to_string()),
            Reply::Empty => None,
        }
    }
}

/// Discovery datagram announcing `peer`.
pub fn encode_join(peer: &PeerHandle) -> String {
    format!("{},{}", JOIN_TAG, peer.encode())
}

pub fn decode_join(datagram: &str) -> Option<PeerHandle> {
    let (tag, rest) = datagram.trim().split_once(',')?;
    if tag != JOIN_TAG {
        return None;
    }
    PeerHandle::decode(rest)
}
