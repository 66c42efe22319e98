//! Queue creation attributes.
//!
//! A [`QueueAttr`] is a plain value object: callers build one, tweak it, and
//! hand it to queue creation. Once the queue exists the attribute is no longer
//! consulted.

use crate::core::error::{QueueError, Result};

/// Maximum queue name size in bytes, terminator included.
pub const MAX_NAME_LEN: usize = 128;

/// Depth applied when no attribute (or a default one) is supplied.
pub const DEFAULT_DEPTH: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum WorkMode {
    #[default]
    Default = 0,
    Push = 1,
    Pull = 2,
}

/// Attribute selector for kind-keyed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QueueAttrType {
    Name = 0,
    Depth = 1,
}

/// Value returned by [`QueueAttr::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAttrValue {
    Name(String),
    Depth(u32),
}

impl QueueAttrValue {
    /// Number of bytes the value occupies on the wire (names carry a terminator).
    pub fn ret_size(&self) -> usize {
        match self {
            QueueAttrValue::Name(name) => name.len() + 1,
            QueueAttrValue::Depth(_) => std::mem::size_of::<u32>(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttr {
    name: [u8; MAX_NAME_LEN],
    depth: u32,
    work_mode: WorkMode,
    flow_ctrl: bool,
    flow_ctrl_drop_time: u32,
    overwrite: bool,
}

impl Default for QueueAttr {
    fn default() -> Self {
        Self {
            name: [0; MAX_NAME_LEN],
            depth: DEFAULT_DEPTH,
            work_mode: WorkMode::Default,
            flow_ctrl: false,
            flow_ctrl_drop_time: 0,
            overwrite: false,
        }
    }
}

impl QueueAttr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default attributes with a caller-chosen depth.
    pub fn with_depth(depth: u32) -> Self {
        Self {
            depth,
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|b| *b == 0).unwrap_or(MAX_NAME_LEN);
        std::str::from_utf8(&self.name[..end]).unwrap_or_default()
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        if name.as_bytes().contains(&0) {
            return Err(QueueError::invalid("name", "queue name must not contain NUL"));
        }
        if name.len() + 1 > MAX_NAME_LEN {
            tracing::error!(
                param = "name",
                value = name.len() + 1,
                reason = "queue name too long",
                "queue name len [{}] can not be larger than {}",
                name.len() + 1,
                MAX_NAME_LEN
            );
            return Err(QueueError::invalid(
                "name",
                format!("length {} exceeds {MAX_NAME_LEN}", name.len() + 1),
            ));
        }
        self.name = [0; MAX_NAME_LEN];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    pub fn work_mode(&self) -> WorkMode {
        self.work_mode
    }

    pub fn set_work_mode(&mut self, mode: WorkMode) {
        self.work_mode = mode;
    }

    pub fn flow_ctrl(&self) -> bool {
        self.flow_ctrl
    }

    pub fn flow_ctrl_drop_time(&self) -> u32 {
        self.flow_ctrl_drop_time
    }

    /// Enables flow control with the given drop time, or disables it with `None`.
    pub fn set_flow_ctrl(&mut self, drop_time: Option<u32>) {
        self.flow_ctrl = drop_time.is_some();
        self.flow_ctrl_drop_time = drop_time.unwrap_or(0);
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn set_overwrite(&mut self, overwrite: bool) {
        self.overwrite = overwrite;
    }

    pub fn get(&self, kind: QueueAttrType) -> QueueAttrValue {
        match kind {
            QueueAttrType::Name => QueueAttrValue::Name(self.name().to_owned()),
            QueueAttrType::Depth => QueueAttrValue::Depth(self.depth),
        }
    }

    pub fn set(&mut self, value: QueueAttrValue) -> Result<()> {
        match value {
            QueueAttrValue::Name(name) => self.set_name(&name),
            QueueAttrValue::Depth(depth) => {
                self.set_depth(depth);
                Ok(())
            }
        }
    }
}
