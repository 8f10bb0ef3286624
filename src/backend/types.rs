//! Common types shared between backends

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const MAP_READ: Self = Self(1 << 0);
    pub const COPY_SRC: Self = Self(1 << 2);
    pub const COPY_DST: Self = Self(1 << 3);
    pub const INDEX: Self = Self(1 << 4);
    pub const VERTEX: Self = Self(1 << 5);
    pub const UNIFORM: Self = Self(1 << 6);
    pub const STORAGE: Self = Self(1 << 7);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub mapped_at_creation: bool,
}

impl BufferDescriptor {
    /// Storage buffer that can take part in transfers in both directions
    pub fn storage(label: &str, size: u64) -> Self {
        Self {
            label: Some(label.to_string()),
            size,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        }
    }
}

/// Adapter selection preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_flags() {
        let usage = BufferUsage::STORAGE | BufferUsage::COPY_DST;
        assert!(usage.contains(BufferUsage::STORAGE));
        assert!(usage.contains(BufferUsage::COPY_DST));
        assert!(!usage.contains(BufferUsage::VERTEX));
        assert_eq!(usage.bits(), (1 << 7) | (1 << 3));
    }

    #[test]
    fn test_storage_descriptor_is_copyable() {
        let desc = BufferDescriptor::storage("work", 256);
        assert_eq!(desc.size, 256);
        assert!(desc.usage.contains(BufferUsage::COPY_SRC | BufferUsage::COPY_DST));
        assert!(!desc.mapped_at_creation);
    }
}
