//! In-memory handling of secrets (archive passwords, bearer tokens)
//!
//! Secrets must never show up in log output, job records, or panic
//! messages, and should not linger in freed memory.

use std::fmt;

/// An opaque secret string.
///
/// Redacts itself in `Debug` and `Display` output and zeroes its buffer
/// on drop. Access to the plaintext is explicit via [`Secret::reveal`].
pub struct Secret {
    inner: String,
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// The plaintext value. Callers must not store or log what this returns.
    pub fn reveal(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        // Zero the heap buffer in place before the String is freed. The
        // write must be volatile so it is not elided as a dead store.
        unsafe {
            for byte in self.inner.as_bytes_mut() {
                std::ptr::write_volatile(byte, 0);
            }
        }
        self.inner.clear();
    }
}

impl Clone for Secret {
    fn clone(&self) -> Self {
        Self::new(self.inner.clone())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{} bytes>)", self.inner.len())
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}
