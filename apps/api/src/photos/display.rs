use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::photo::DisplayRef;

/// Bytes and content type served for one display reference.
#[derive(Debug, Clone)]
pub struct DisplayBlob {
    pub bytes: Bytes,
    pub mime_type: String,
}

/// Registry of display references for the current process.
/// Tokens are never persisted and die with the process.
#[derive(Default)]
pub struct DisplayRegistry {
    entries: RwLock<HashMap<Uuid, DisplayBlob>>,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh reference for the given bytes. The payload is shared, not copied.
    pub async fn register(&self, bytes: Bytes, mime_type: &str) -> DisplayRef {
        let display = DisplayRef::new();
        self.entries.write().await.insert(
            display.token(),
            DisplayBlob {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        display
    }

    pub async fn resolve(&self, token: Uuid) -> Option<DisplayBlob> {
        self.entries.read().await.get(&token).cloned()
    }

    pub async fn revoke(&self, reference: DisplayRef) {
        let token = reference.token();
        if self.entries.write().await.remove(&token).is_some() {
            debug!(%token, "Revoked display reference");
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_resolve_revoke() {
        let registry = DisplayRegistry::new();
        let display = registry
            .register(Bytes::from_static(b"pixels"), "image/png")
            .await;

        let blob = registry.resolve(display.token()).await.unwrap();
        assert_eq!(blob.bytes.as_ref(), b"pixels");
        assert_eq!(blob.mime_type, "image/png");

        registry.revoke(display).await;
        assert!(registry.resolve(display.token()).await.is_none());
    }

    #[tokio::test]
    async fn test_each_registration_gets_a_new_token() {
        let registry = DisplayRegistry::new();
        let bytes = Bytes::from_static(b"same");
        let first = registry.register(bytes.clone(), "image/jpeg").await;
        let second = registry.register(bytes, "image/jpeg").await;
        assert_ne!(first, second);
        assert_eq!(registry.len().await, 2);

        registry.clear().await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_revoke_twice_leaves_other_references() {
        let registry = DisplayRegistry::new();
        let kept = registry.register(Bytes::from_static(b"a"), "image/png").await;
        let gone = registry.register(Bytes::from_static(b"b"), "image/png").await;

        registry.revoke(gone).await;
        registry.revoke(gone).await;

        assert!(registry.resolve(gone.token()).await.is_none());
        assert!(registry.resolve(kept.token()).await.is_some());
        assert_eq!(registry.len().await, 1);
    }
}
