use bytes::Bytes;

/// The `(success, data, length)` triple delivered to a completion callback,
/// captured as a value for the future-based API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub success: bool,
    pub data: Bytes,
    pub length: usize,
}

impl Completion {
    pub fn new(success: bool, data: &[u8], length: usize) -> Self {
        Self {
            success,
            data: Bytes::copy_from_slice(data),
            length,
        }
    }

    /// The value reported for every failed request.
    pub fn failed() -> Self {
        Self {
            success: false,
            data: Bytes::new(),
            length: 0,
        }
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}
