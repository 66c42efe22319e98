//! Wire layout for the broker round trip.
//!
//! Route-table buffer (all little-endian):
//! - header: total length (u64), route count (u32), sub-event id (u32)
//! - query block, queries only: query type (u32), src id (u32), dst id (u32)
//! - `route count` records: src id (u32), dst id (u32), status (i32)
//!
//! The same codec is used by the client and by the simulated broker, so both
//! sides agree on offsets by construction.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::route::{Route, RouteQueryInfo, RouteQueryMode};

/// Event id carried by every broker control message.
pub const QS_MSG_EVENT_ID: u32 = 25;
/// Channel group used when device processes talk to the broker.
pub const BIND_QUEUE_GROUP_ID: u32 = 2;
/// Version this client advertises in the connect message.
pub const CLIENT_MAJOR_VERSION: u16 = 1;
/// Broker versions at or above this hand the route buffer back after replying.
pub const ENHANCED_BROKER_VERSION: u16 = 2;

pub const HEADER_LEN: usize = 16;
pub const QUERY_BLOCK_LEN: usize = 12;
pub const ROUTE_RECORD_LEN: usize = 12;
pub const CONNECT_MSG_LEN: usize = 12;
pub const REPLY_LEN: usize = 16;
pub const ROUTE_LIST_MSG_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SubEvent {
    BindInit = 12,
    Bind = 13,
    Unbind = 14,
    QueryNum = 15,
    Query = 16,
}

impl SubEvent {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            12 => Some(SubEvent::BindInit),
            13 => Some(SubEvent::Bind),
            14 => Some(SubEvent::Unbind),
            15 => Some(SubEvent::QueryNum),
            16 => Some(SubEvent::Query),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SubEvent::BindInit => "connect",
            SubEvent::Bind => "bind",
            SubEvent::Unbind => "unbind",
            SubEvent::QueryNum => "query route num",
            SubEvent::Query => "query routes",
        }
    }
}

/// Broker-side query types.
pub mod query_type {
    pub const SRC: u32 = 0;
    pub const DST: u32 = 1;
    pub const SRC_OR_DST: u32 = 2;
    pub const SRC_AND_DST: u32 = 3;
    pub const ABNORMAL: u32 = 100;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTableHeader {
    pub length: u64,
    pub route_num: u32,
    pub sub_event: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryBlock {
    pub query_type: u32,
    pub src: u32,
    pub dst: u32,
}

impl QueryBlock {
    /// Translates a validated descriptor; unconfigured ids go out as zero.
    pub fn from_info(info: &RouteQueryInfo, mode: RouteQueryMode) -> Self {
        let query_type = match mode {
            RouteQueryMode::BySrc => query_type::SRC,
            RouteQueryMode::ByDst => query_type::DST,
            RouteQueryMode::BySrcAndDst => query_type::SRC_AND_DST,
            RouteQueryMode::Abnormal => query_type::ABNORMAL,
        };
        Self {
            query_type,
            src: info.src_id().unwrap_or(0),
            dst: info.dst_id().unwrap_or(0),
        }
    }

    /// Matches every route where `qid` is either endpoint.
    pub fn touching(qid: u32) -> Self {
        Self {
            query_type: query_type::SRC_OR_DST,
            src: qid,
            dst: qid,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(QUERY_BLOCK_LEN);
        self.put(&mut buf);
        buf.freeze()
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.query_type);
        buf.put_u32_le(self.src);
        buf.put_u32_le(self.dst);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < QUERY_BLOCK_LEN {
            return Err("insufficient data for query block");
        }
        Ok(Self {
            query_type: data.get_u32_le(),
            src: data.get_u32_le(),
            dst: data.get_u32_le(),
        })
    }
}

pub fn route_table_len(route_num: usize) -> usize {
    HEADER_LEN + route_num * ROUTE_RECORD_LEN
}

pub fn query_table_len(route_num: usize) -> usize {
    HEADER_LEN + QUERY_BLOCK_LEN + route_num * ROUTE_RECORD_LEN
}

fn put_header(buf: &mut BytesMut, length: usize, route_num: usize, op: SubEvent) {
    buf.put_u64_le(length as u64);
    buf.put_u32_le(route_num as u32);
    buf.put_u32_le(op as u32);
}

fn put_record(buf: &mut BytesMut, src: u32, dst: u32, status: i32) {
    buf.put_u32_le(src);
    buf.put_u32_le(dst);
    buf.put_i32_le(status);
}

/// Builds the bind/unbind table; statuses go out zeroed for the broker to fill.
pub fn encode_route_table(op: SubEvent, routes: &[Route]) -> BytesMut {
    let length = route_table_len(routes.len());
    let mut buf = BytesMut::with_capacity(length);
    put_header(&mut buf, length, routes.len(), op);
    for route in routes {
        put_record(&mut buf, route.src(), route.dst(), 0);
    }
    buf
}

/// Builds a query table sized for exactly `route_num` result records.
pub fn encode_query_table(query: &QueryBlock, route_num: usize) -> BytesMut {
    let length = query_table_len(route_num);
    let mut buf = BytesMut::with_capacity(length);
    put_header(&mut buf, length, route_num, SubEvent::Query);
    query.put(&mut buf);
    buf.put_bytes(0, route_num * ROUTE_RECORD_LEN);
    buf
}

pub fn decode_header(mut data: &[u8]) -> Result<RouteTableHeader, &'static str> {
    if data.len() < HEADER_LEN {
        return Err("insufficient data for header");
    }
    Ok(RouteTableHeader {
        length: data.get_u64_le(),
        route_num: data.get_u32_le(),
        sub_event: data.get_u32_le(),
    })
}

/// Reads `count` records starting at `offset`.
pub fn decode_records(data: &[u8], offset: usize, count: usize) -> Result<Vec<Route>, &'static str> {
    let end = offset + count * ROUTE_RECORD_LEN;
    if data.len() < end {
        return Err("route records exceed buffer");
    }
    let mut cur = &data[offset..end];
    let mut routes = Vec::with_capacity(count);
    for _ in 0..count {
        let src = cur.get_u32_le();
        let dst = cur.get_u32_le();
        let status = cur.get_i32_le();
        routes.push(Route::with_status(src, dst, status));
    }
    Ok(routes)
}

/// Overwrites the record at `index` in an encoded table.
pub fn write_record(data: &mut [u8], offset: usize, index: usize, route: &Route) -> Result<(), &'static str> {
    let start = offset + index * ROUTE_RECORD_LEN;
    let end = start + ROUTE_RECORD_LEN;
    if data.len() < end {
        return Err("route record exceeds buffer");
    }
    let mut out = &mut data[start..end];
    out.put_u32_le(route.src());
    out.put_u32_le(route.dst());
    out.put_i32_le(route.status());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectMsg {
    pub pid: i32,
    pub grp_id: u32,
    pub major_version: u16,
}

impl ConnectMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CONNECT_MSG_LEN);
        buf.put_i32_le(self.pid);
        buf.put_u32_le(self.grp_id);
        buf.put_u16_le(self.major_version);
        buf.put_u16_le(0);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < CONNECT_MSG_LEN {
            return Err("insufficient data for connect message");
        }
        let pid = data.get_i32_le();
        let grp_id = data.get_u32_le();
        let major_version = data.get_u16_le();
        Ok(Self {
            pid,
            grp_id,
            major_version,
        })
    }
}

/// Inline message pointing the broker at a route table.
///
/// Host callers pass the device address of the table; device callers pass
/// zero because the table travels through the contact queue instead.
pub fn encode_route_list_msg(addr: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ROUTE_LIST_MSG_LEN);
    buf.put_u64_le(addr);
    buf.freeze()
}

pub fn decode_route_list_msg(mut data: &[u8]) -> Result<u64, &'static str> {
    if data.len() < ROUTE_LIST_MSG_LEN {
        return Err("insufficient data for route list message");
    }
    Ok(data.get_u64_le())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reply {
    pub ret_value: u64,
    pub ret_code: i32,
    pub major_version: u16,
    pub minor_version: u16,
}

impl Reply {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REPLY_LEN);
        buf.put_u64_le(self.ret_value);
        buf.put_i32_le(self.ret_code);
        buf.put_u16_le(self.major_version);
        buf.put_u16_le(self.minor_version);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < REPLY_LEN {
            return Err("insufficient data for reply");
        }
        Ok(Self {
            ret_value: data.get_u64_le(),
            ret_code: data.get_i32_le(),
            major_version: data.get_u16_le(),
            minor_version: data.get_u16_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_table_layout_is_bit_exact() {
        let table = encode_route_table(SubEvent::Bind, &[Route::new(1, 2), Route::new(3, 4)]);
        assert_eq!(table.len(), 16 + 2 * 12);
        assert_eq!(&table[0..8], &40u64.to_le_bytes());
        assert_eq!(&table[8..12], &2u32.to_le_bytes());
        assert_eq!(&table[12..16], &(SubEvent::Bind as u32).to_le_bytes());
        assert_eq!(&table[16..20], &1u32.to_le_bytes());
        assert_eq!(&table[20..24], &2u32.to_le_bytes());
        assert_eq!(&table[24..28], &0i32.to_le_bytes());
        assert_eq!(&table[28..32], &3u32.to_le_bytes());
    }

    #[test]
    fn query_table_reserves_result_records() {
        let query = QueryBlock::touching(9);
        let table = encode_query_table(&query, 3);
        assert_eq!(table.len(), query_table_len(3));
        let header = decode_header(&table).unwrap();
        assert_eq!(header.route_num, 3);
        assert_eq!(header.length as usize, table.len());
        assert_eq!(header.sub_event, SubEvent::Query as u32);
        assert_eq!(QueryBlock::decode(&table[HEADER_LEN..]).unwrap(), query);
    }

    #[test]
    fn broker_status_writes_land_in_the_right_record() {
        let mut table = encode_route_table(SubEvent::Unbind, &[Route::new(1, 2), Route::new(5, 6)]);
        write_record(&mut table, HEADER_LEN, 1, &Route::with_status(5, 6, -7)).unwrap();
        let routes = decode_records(&table, HEADER_LEN, 2).unwrap();
        assert_eq!(routes[0].status(), 0);
        assert_eq!(routes[1].status(), -7);
        assert!(decode_records(&table, HEADER_LEN, 3).is_err());
    }

    #[test]
    fn query_modes_translate_to_broker_types() {
        let info = RouteQueryInfo::by_src_and_dst(4, 5);
        let block = QueryBlock::from_info(&info, RouteQueryMode::BySrcAndDst);
        assert_eq!(block.query_type, query_type::SRC_AND_DST);
        let abnormal = QueryBlock::from_info(&RouteQueryInfo::abnormal(), RouteQueryMode::Abnormal);
        assert_eq!((abnormal.query_type, abnormal.src, abnormal.dst), (100, 0, 0));
    }

    #[test]
    fn short_inputs_are_rejected() {
        assert!(decode_header(&[0u8; 8]).is_err());
        assert!(Reply::decode(&[0u8; 4]).is_err());
        assert!(ConnectMsg::decode(&[0u8; 4]).is_err());
    }
}
