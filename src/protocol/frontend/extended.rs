//! Extended query protocol messages.
//!
//! The engine always uses the unnamed statement and portal, binds
//! parameters in binary format and requests binary results.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

/// Write a Parse message.
///
/// - `query`: SQL with `$1, $2, ...` placeholders
/// - `param_oids`: parameter type OIDs (0 lets the server infer)
pub fn write_parse(buf: &mut Vec<u8>, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr("");
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

/// Write a Bind message from pre-encoded parameter frames.
///
/// `param_frames` holds `param_count` length-prefixed data frames laid
/// out back to back (a NULL parameter is the single frame `-1`). All
/// parameters are declared binary and a single binary result format is
/// requested for every column.
pub fn write_bind(buf: &mut Vec<u8>, param_count: u16, param_frames: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);

    msg.write_cstr(""); // portal
    msg.write_cstr(""); // statement

    msg.write_i16(param_count as i16);
    for _ in 0..param_count {
        msg.write_i16(FormatCode::Binary as i16);
    }

    msg.write_i16(param_count as i16);
    msg.write_bytes(param_frames);

    // one result format code applied to all columns
    msg.write_i16(1);
    msg.write_i16(FormatCode::Binary as i16);

    msg.finish();
}

/// Write a Describe message for the unnamed portal.
pub fn write_describe_portal(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'P');
    msg.write_cstr("");
    msg.finish();
}

/// Write an Execute message for the unnamed portal.
///
/// `max_rows` of 0 means unlimited.
pub fn write_execute(buf: &mut Vec<u8>, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr("");
    msg.write_i32(max_rows as i32);
    msg.finish();
}

/// Write a Sync message, ending the extended query sequence.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}
