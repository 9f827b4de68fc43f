//! Typed values over a [`KeyValueStore`].
//!
//! Strings are stored raw and everything else as JSON text. Reads try JSON
//! first and fall back to treating the stored text as a plain string, so
//! values written by either convention load back.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::kv::KeyValueStore;

/// Reads `key`, returning `default` when the key is unset.
///
/// Stored text that decodes to neither `T` nor a string `T` also yields
/// `default` (logged).
///
/// # Errors
/// Returns an error if the underlying store fails.
pub async fn load_value<T>(store: &dyn KeyValueStore, key: &str, default: T) -> Result<T>
where
    T: DeserializeOwned,
{
    let Some(raw) = store
        .get_item(key)
        .await
        .with_context(|| format!("Failed to load '{key}'"))?
    else {
        return Ok(default);
    };

    Ok(decode(&raw).unwrap_or_else(|| {
        tracing::warn!(key, "stored value has unexpected shape; using default");
        default
    }))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_str::<T>(raw)
        .ok()
        .or_else(|| serde_json::from_value(Value::String(raw.to_string())).ok())
}

/// Writes `value` under `key`.
///
/// # Errors
/// Returns an error if serialization or the store fails.
pub async fn save_value<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let text = match serde_json::to_value(value).context("Failed to serialize value")? {
        Value::String(s) => s,
        other => other.to_string(),
    };
    store
        .set_item(key, &text)
        .await
        .with_context(|| format!("Failed to save '{key}'"))
}

/// Deletes `key`; later loads yield the caller's default.
///
/// # Errors
/// Returns an error if the store fails.
pub async fn remove_value(store: &dyn KeyValueStore, key: &str) -> Result<()> {
    store
        .delete_item(key)
        .await
        .with_context(|| format!("Failed to remove '{key}'"))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::kv::MemoryStore;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Flags {
        push: bool,
        email: bool,
    }

    #[tokio::test]
    async fn test_unset_key_yields_default() {
        let store = MemoryStore::new();
        let value = load_value(&store, "language", "en".to_string()).await.unwrap();
        assert_eq!(value, "en");
    }

    /// Strings are stored raw, structured values as JSON.
    #[tokio::test]
    async fn test_storage_encoding() {
        let store = MemoryStore::new();
        save_value(&store, "language", "pt").await.unwrap();
        save_value(&store, "flags", &Flags { push: true, email: false })
            .await
            .unwrap();
        save_value(&store, "done", &true).await.unwrap();

        assert_eq!(store.get_item("language").await.unwrap().as_deref(), Some("pt"));
        assert_eq!(
            store.get_item("flags").await.unwrap().as_deref(),
            Some(r#"{"email":false,"push":true}"#)
        );
        assert_eq!(store.get_item("done").await.unwrap().as_deref(), Some("true"));
    }

    /// JSON-quoted and raw strings both load.
    #[tokio::test]
    async fn test_raw_string_fallback() {
        let store = MemoryStore::new();
        store.set_item("a", "\"dark\"").await.unwrap();
        store.set_item("b", "dark").await.unwrap();

        assert_eq!(load_value(&store, "a", String::new()).await.unwrap(), "dark");
        assert_eq!(load_value(&store, "b", String::new()).await.unwrap(), "dark");
    }

    #[tokio::test]
    async fn test_mismatched_shape_yields_default() {
        let store = MemoryStore::new();
        store.set_item("done", "maybe").await.unwrap();
        assert!(!load_value(&store, "done", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_value_restores_default() {
        let store = MemoryStore::new();
        save_value(&store, "flags", &Flags { push: false, email: false })
            .await
            .unwrap();
        remove_value(&store, "flags").await.unwrap();

        let flags = load_value(&store, "flags", Flags { push: true, email: true })
            .await
            .unwrap();
        assert_eq!(flags, Flags { push: true, email: true });
    }
}
