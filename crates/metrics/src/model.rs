//! Model descriptors as reported by the endpoint's model listing.

use serde::{Deserialize, Serialize};

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub digest: String,
    pub modified_at: String,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            digest: String::new(),
            modified_at: String::new(),
        }
    }

    pub fn disk_gb(&self) -> f64 {
        self.size_bytes as f64 / BYTES_PER_GIB
    }

    /// One-decimal disk size, or `n/a` when the endpoint reported no size.
    pub fn disk_label(&self) -> String {
        if self.size_bytes > 0 {
            format!("{:.1}", self.disk_gb())
        } else {
            "n/a".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_size_is_reported_in_gib() {
        let model = ModelDescriptor::new("qwen3:8b", 5 * 1024 * 1024 * 1024);
        assert_eq!(model.disk_gb(), 5.0);
        assert_eq!(model.disk_label(), "5.0");
        assert_eq!(ModelDescriptor::new("empty", 0).disk_label(), "n/a");
    }
}
