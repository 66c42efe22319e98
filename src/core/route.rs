//! Route value objects: a single producer→consumer link, the caller-owned list
//! that bind/unbind/query operate on, and the query descriptor.

use crate::core::error::{QueueError, Result};

/// Relation states reported by route queries.
pub mod status {
    pub const UNBOUND: i32 = 0;
    pub const BOUND: i32 = 1;
    pub const BOUND_ABNORMAL: i32 = 2;
}

/// Field selector for kind-keyed route access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RouteParamType {
    Src = 0,
    Dst = 1,
    Status = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    src: u32,
    dst: u32,
    status: i32,
}

impl Route {
    pub fn new(src: u32, dst: u32) -> Self {
        Self { src, dst, status: 0 }
    }

    pub(crate) fn with_status(src: u32, dst: u32, status: i32) -> Self {
        Self { src, dst, status }
    }

    pub fn src(&self) -> u32 {
        self.src
    }

    pub fn dst(&self) -> u32 {
        self.dst
    }

    /// Filled in by the broker after a bind/unbind/query round trip.
    pub fn status(&self) -> i32 {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: i32) {
        self.status = status;
    }

    /// Reads a field by kind, returning its value and its byte size.
    pub fn param(&self, kind: RouteParamType) -> (i64, usize) {
        match kind {
            RouteParamType::Src => (i64::from(self.src), std::mem::size_of::<u32>()),
            RouteParamType::Dst => (i64::from(self.dst), std::mem::size_of::<u32>()),
            RouteParamType::Status => (i64::from(self.status), std::mem::size_of::<i32>()),
        }
    }
}

/// Insertion-ordered, duplicate-tolerant list of routes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteList {
    routes: Vec<Route>,
}

impl RouteList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn get(&self, index: usize) -> Result<Route> {
        self.routes.get(index).copied().ok_or_else(|| {
            tracing::error!(
                param = "index",
                value = index,
                reason = "out of range",
                "index [{}] must be smaller than [{}]",
                index,
                self.routes.len()
            );
            QueueError::invalid(
                "index",
                format!("{index} must be smaller than {}", self.routes.len()),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn as_slice(&self) -> &[Route] {
        &self.routes
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Route] {
        &mut self.routes
    }
}

impl FromIterator<Route> for RouteList {
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RouteQueryMode {
    BySrc = 0,
    ByDst = 1,
    BySrcAndDst = 2,
    Abnormal = 100,
}

impl TryFrom<u32> for RouteQueryMode {
    type Error = QueueError;

    fn try_from(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(RouteQueryMode::BySrc),
            1 => Ok(RouteQueryMode::ByDst),
            2 => Ok(RouteQueryMode::BySrcAndDst),
            100 => Ok(RouteQueryMode::Abnormal),
            other => {
                tracing::error!("[Check][Type]unknown query mode {}", other);
                Err(QueueError::invalid("mode", format!("unknown query mode {other}")))
            }
        }
    }
}

/// Query descriptor; every field remembers whether it was configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteQueryInfo {
    mode: Option<RouteQueryMode>,
    src: Option<u32>,
    dst: Option<u32>,
}

impl RouteQueryInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_src(src: u32) -> Self {
        Self::new().mode(RouteQueryMode::BySrc).src(src)
    }

    pub fn by_dst(dst: u32) -> Self {
        Self::new().mode(RouteQueryMode::ByDst).dst(dst)
    }

    pub fn by_src_and_dst(src: u32, dst: u32) -> Self {
        Self::new().mode(RouteQueryMode::BySrcAndDst).src(src).dst(dst)
    }

    pub fn abnormal() -> Self {
        Self::new().mode(RouteQueryMode::Abnormal)
    }

    pub fn mode(mut self, mode: RouteQueryMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn src(mut self, src: u32) -> Self {
        self.src = Some(src);
        self
    }

    pub fn dst(mut self, dst: u32) -> Self {
        self.dst = Some(dst);
        self
    }

    pub fn query_mode(&self) -> Option<RouteQueryMode> {
        self.mode
    }

    pub fn src_id(&self) -> Option<u32> {
        self.src
    }

    pub fn dst_id(&self) -> Option<u32> {
        self.dst
    }

    /// Checks that the fields the mode depends on were configured.
    pub fn validate(&self) -> Result<RouteQueryMode> {
        let mode = self.mode.ok_or_else(|| {
            tracing::error!("mode must be set in the route query info");
            QueueError::invalid("mode", "query mode must be configured")
        })?;
        let missing = match mode {
            RouteQueryMode::BySrc if self.src.is_none() => Some("src qid must be configured"),
            RouteQueryMode::ByDst if self.dst.is_none() => Some("dst qid must be configured"),
            RouteQueryMode::BySrcAndDst if self.src.is_none() || self.dst.is_none() => {
                Some("src and dst qid must be configured")
            }
            _ => None,
        };
        if let Some(reason) = missing {
            tracing::error!(param = "queryInfo", mode = ?mode, reason, "invalid route query");
            return Err(QueueError::invalid("queryInfo", reason));
        }
        Ok(mode)
    }
}
