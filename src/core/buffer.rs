//! Shared-buffer (mbuf) handles and queue permission flags.

use bitflags::bitflags;

use crate::core::error::{QueueError, Result};

/// Opaque transport handle for a shared buffer.
///
/// Handles cross process boundaries as plain integers, so a zero value is the
/// "null" handle and is rejected before any transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufHandle(u64);

impl BufHandle {
    pub const NULL: BufHandle = BufHandle(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Rejects the null handle with an invalid-argument error naming `param`.
    pub fn require(self, param: &'static str) -> Result<Self> {
        if self.is_null() {
            tracing::error!(param, value = "null", reason = "must not be null", "invalid buffer handle");
            return Err(QueueError::invalid(param, "buffer handle must not be null"));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BufType {
    Normal = 0,
    Dvpp = 1,
}

impl TryFrom<u32> for BufType {
    type Error = QueueError;

    fn try_from(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(BufType::Normal),
            1 => Ok(BufType::Dvpp),
            other => {
                tracing::error!(
                    param = "type",
                    value = other,
                    reason = "must be equal to 0 or 1 currently",
                    "invalid buffer type"
                );
                Err(QueueError::invalid("type", format!("{other} must be equal to 0 or 1")))
            }
        }
    }
}

bitflags! {
    /// Cross-process queue permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permission: u32 {
        const MANAGE = 1;
        const DEQUEUE = 1 << 1;
        const ENQUEUE = 1 << 2;
    }
}

impl Permission {
    /// Read/write without manage rights.
    pub const READ_WRITE: Permission = Permission::DEQUEUE.union(Permission::ENQUEUE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_is_rejected() {
        let err = BufHandle::NULL.require("buf").unwrap_err();
        assert_eq!(err.code(), crate::core::error::codes::INVALID_PARAM);
        assert!(BufHandle::from_raw(7).require("buf").is_ok());
    }

    #[test]
    fn buffer_type_accepts_only_known_values() {
        assert_eq!(BufType::try_from(0).unwrap(), BufType::Normal);
        assert_eq!(BufType::try_from(1).unwrap(), BufType::Dvpp);
        assert!(BufType::try_from(2).is_err());
    }

    #[test]
    fn permission_bits_match_public_values() {
        assert_eq!(Permission::MANAGE.bits(), 1);
        assert_eq!(Permission::DEQUEUE.bits(), 2);
        assert_eq!(Permission::ENQUEUE.bits(), 4);
        assert_eq!(Permission::all().bits(), 7);
    }
}
