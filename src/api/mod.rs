//! Public queue operations.
//!
//! Every call resolves the process-wide [`QueueManager`] and forwards to its
//! processor. Install a manager with [`QueueManager::install`] first; without
//! one every call reports an internal error.

use std::sync::Arc;

use bytes::Bytes;
use tracing::error;

use crate::core::attr::QueueAttr;
use crate::core::buffer::{BufHandle, BufType, Permission};
use crate::core::error::{QueueError, Result};
use crate::core::manager::QueueManager;
use crate::core::processor::QueueProcessor;
use crate::core::route::{RouteList, RouteQueryInfo};

fn processor() -> Result<Arc<dyn QueueProcessor>> {
    QueueManager::global()?.get_processor()
}

// ───────────────────────────────────────────────────────────
// Queues
// ───────────────────────────────────────────────────────────

/// Creates a queue; `None` applies the default attributes.
pub fn create_queue(attr: Option<&QueueAttr>) -> Result<u32> {
    processor()?.create_queue(attr)
}

/// Destroys a queue. Fails while any route still references it.
pub fn destroy_queue(qid: u32) -> Result<()> {
    processor()?.destroy_queue(qid)
}

/// Enqueues a buffer; a negative timeout waits forever.
pub fn enqueue(qid: u32, buf: BufHandle, timeout_ms: i32) -> Result<()> {
    processor()?.enqueue(qid, buf, timeout_ms)
}

pub fn dequeue(qid: u32, timeout_ms: i32) -> Result<BufHandle> {
    processor()?.dequeue(qid, timeout_ms)
}

pub fn enqueue_data(qid: u32, data: &[u8], user_data: &[u8], timeout_ms: i32) -> Result<()> {
    processor()?.enqueue_data(qid, data, user_data, timeout_ms)
}

/// Dequeues payload and user data, returning the payload size.
pub fn dequeue_data(
    qid: u32,
    data: &mut [u8],
    user_data: &mut [u8],
    timeout_ms: i32,
) -> Result<usize> {
    processor()?.dequeue_data(qid, data, user_data, timeout_ms)
}

/// Grants `pid` the raw permission bits (manage 1, dequeue 2, enqueue 4).
pub fn grant_queue(qid: u32, pid: i32, permission: u32, timeout_ms: i32) -> Result<()> {
    let permission = Permission::from_bits(permission).ok_or_else(|| {
        error!(param = "permission", value = permission, reason = "unknown bits", "invalid permission");
        QueueError::invalid("permission", format!("{permission:#x} has unknown bits"))
    })?;
    processor()?.grant_queue(qid, pid, permission, timeout_ms)
}

/// Attaches to a queue created by another process; returns the granted bits.
pub fn attach_queue(qid: u32, timeout_ms: i32) -> Result<u32> {
    processor()?
        .attach_queue(qid, timeout_ms)
        .map(|permission| permission.bits())
}

// ───────────────────────────────────────────────────────────
// Routes
// ───────────────────────────────────────────────────────────

pub fn bind_routes(routes: &mut RouteList) -> Result<()> {
    processor()?.bind_routes(routes)
}

pub fn unbind_routes(routes: &mut RouteList) -> Result<()> {
    processor()?.unbind_routes(routes)
}

/// Replaces the contents of `out` with the routes matching `info`.
pub fn query_routes(info: &RouteQueryInfo, out: &mut RouteList) -> Result<()> {
    out.clear();
    info.validate()?;
    processor()?.query_routes(info, out)
}

// ───────────────────────────────────────────────────────────
// Buffers
// ───────────────────────────────────────────────────────────

/// Allocates a shared buffer; `kind` is 0 (normal) or 1 (DVPP).
pub fn alloc_buf(size: usize, kind: u32) -> Result<BufHandle> {
    if size == 0 {
        error!(param = "size", value = 0, reason = "must be positive", "invalid buffer size");
        return Err(QueueError::invalid("size", "must be positive"));
    }
    let kind = BufType::try_from(kind)?;
    processor()?.alloc_buf(size, kind)
}

pub fn free_buf(buf: BufHandle) -> Result<()> {
    processor()?.free_buf(buf)
}

pub fn get_buf_data(buf: BufHandle) -> Result<Bytes> {
    processor()?.get_buf_data(buf)
}

pub fn write_buf_data(buf: BufHandle, offset: usize, data: &[u8]) -> Result<()> {
    processor()?.write_buf_data(buf, offset, data)
}

pub fn get_buf_data_len(buf: BufHandle) -> Result<usize> {
    processor()?.get_buf_data_len(buf)
}

pub fn set_buf_data_len(buf: BufHandle, len: usize) -> Result<()> {
    processor()?.set_buf_data_len(buf, len)
}

pub fn get_buf_user_data(buf: BufHandle, out: &mut [u8], offset: usize) -> Result<()> {
    processor()?.get_buf_user_data(buf, out, offset)
}

pub fn set_buf_user_data(buf: BufHandle, data: &[u8], offset: usize) -> Result<()> {
    processor()?.set_buf_user_data(buf, data, offset)
}

pub fn copy_buf_ref(buf: BufHandle) -> Result<BufHandle> {
    processor()?.copy_buf_ref(buf)
}

pub fn append_buf_chain(head: BufHandle, buf: BufHandle) -> Result<()> {
    processor()?.append_buf_chain(head, buf)
}

pub fn get_buf_chain_num(head: BufHandle) -> Result<u32> {
    processor()?.get_buf_chain_num(head)
}

pub fn get_buf_from_chain(head: BufHandle, index: u32) -> Result<BufHandle> {
    processor()?.get_buf_from_chain(head, index)
}
